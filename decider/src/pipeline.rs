//! Pipeline engine: runs the four stages in fixed order over one context.
//!
//! ```text
//! INIT -> VALIDATING_IDEA -> ANALYZING_MARKET -> ADVISING_STRATEGY -> REFLECTING -> DONE
//!            \________________\__________________\___________________\-> FAILED
//! ```
//!
//! The engine advances only after the current stage's output is committed to a new context
//! snapshot. It never retries a stage; backend retries are the fallback adapter's job.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::agents::idea::IdeaValidator;
use crate::agents::market::MarketAnalyst;
use crate::agents::prompt::PromptBuilder;
use crate::agents::reflection::Reflector;
use crate::agents::strategy::StrategyAdvisor;
use crate::core::calmness::{self, CalmnessAnswers};
use crate::core::context::{DecisionContext, DecisionInput, RunMeta, StageFailure};
use crate::core::decision_index;
use crate::core::error::KernelResult;
use crate::core::types::{Stage, StageOutput};
use crate::io::backend::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    ValidatingIdea,
    AnalyzingMarket,
    AdvisingStrategy,
    Reflecting,
    Done,
    Failed,
}

impl PipelineState {
    /// Successor on the happy path. Terminal states map to themselves.
    pub fn next(self) -> Self {
        match self {
            PipelineState::Init => PipelineState::ValidatingIdea,
            PipelineState::ValidatingIdea => PipelineState::AnalyzingMarket,
            PipelineState::AnalyzingMarket => PipelineState::AdvisingStrategy,
            PipelineState::AdvisingStrategy => PipelineState::Reflecting,
            PipelineState::Reflecting => PipelineState::Done,
            PipelineState::Done => PipelineState::Done,
            PipelineState::Failed => PipelineState::Failed,
        }
    }

    /// Stage executed while in this state.
    pub fn stage(self) -> Option<Stage> {
        match self {
            PipelineState::ValidatingIdea => Some(Stage::IdeaValidation),
            PipelineState::AnalyzingMarket => Some(Stage::MarketAnalysis),
            PipelineState::AdvisingStrategy => Some(Stage::StrategyAdvice),
            PipelineState::Reflecting => Some(Stage::Reflection),
            PipelineState::Init | PipelineState::Done | PipelineState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Init => "INIT",
            PipelineState::ValidatingIdea => "VALIDATING_IDEA",
            PipelineState::AnalyzingMarket => "ANALYZING_MARKET",
            PipelineState::AdvisingStrategy => "ADVISING_STRATEGY",
            PipelineState::Reflecting => "REFLECTING",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub context: DecisionContext,
    /// `Done` or `Failed`.
    pub state: PipelineState,
    /// Every state visited, starting with `Init`.
    pub transitions: Vec<PipelineState>,
}

impl PipelineOutcome {
    pub fn is_done(&self) -> bool {
        self.state == PipelineState::Done
    }
}

/// Owns the four stage agents and borrows a backend for the duration of a run.
#[derive(Debug)]
pub struct Pipeline<'b, B: Backend + ?Sized> {
    backend: &'b B,
    prompts: PromptBuilder,
    idea: IdeaValidator,
    market: MarketAnalyst,
    strategy: StrategyAdvisor,
    reflector: Reflector,
}

impl<'b, B: Backend + ?Sized> Pipeline<'b, B> {
    pub fn new(backend: &'b B, prompt_budget_bytes: usize) -> KernelResult<Self> {
        Ok(Self {
            backend,
            prompts: PromptBuilder::new(prompt_budget_bytes)?,
            idea: IdeaValidator::new()?,
            market: MarketAnalyst::new()?,
            strategy: StrategyAdvisor::new()?,
            reflector: Reflector::new()?,
        })
    }

    /// Run every stage over `ctx`. Never returns an error: failures end in `FAILED`.
    #[instrument(skip_all, fields(run_id = %ctx.meta().run_id))]
    pub fn run(&self, ctx: DecisionContext) -> PipelineOutcome {
        let mut ctx = ctx;
        let mut transitions = vec![PipelineState::Init];
        let mut state = PipelineState::Init.next();
        loop {
            transitions.push(state);
            let Some(stage) = state.stage() else {
                break;
            };
            match self.step(stage, &ctx) {
                Ok(next) => {
                    ctx = next;
                    state = state.next();
                }
                Err(err) => {
                    warn!(stage = %stage, error = %err, "stage failed; halting pipeline");
                    ctx = ctx.with_failure(StageFailure {
                        stage,
                        message: err.to_string(),
                    });
                    state = PipelineState::Failed;
                    transitions.push(state);
                    break;
                }
            }
        }
        info!(state = state.as_str(), "pipeline finished");
        PipelineOutcome {
            context: ctx,
            state,
            transitions,
        }
    }

    fn step(&self, stage: Stage, ctx: &DecisionContext) -> KernelResult<DecisionContext> {
        match stage {
            Stage::IdeaValidation => {
                let run = self.idea.run(self.backend, &self.prompts, ctx)?;
                ctx.with_stage(StageOutput::IdeaValidation(run.output), run.provenance)
            }
            Stage::MarketAnalysis => {
                let run = self.market.run(self.backend, &self.prompts, ctx)?;
                ctx.with_stage(StageOutput::MarketAnalysis(run.output), run.provenance)
            }
            Stage::StrategyAdvice => {
                let run = self.strategy.run(self.backend, &self.prompts, ctx)?;
                ctx.with_stage(StageOutput::StrategyAdvice(run.output), run.provenance)
            }
            Stage::Reflection => self.reflect(ctx),
        }
    }

    /// Check the reflection precondition, then reflect into a new snapshot.
    ///
    /// On a context missing any analysis stage this fails before the backend is called
    /// and `ctx` is left as it was.
    pub fn reflect(&self, ctx: &DecisionContext) -> KernelResult<DecisionContext> {
        let inputs = ctx.reflection_inputs()?;
        let run = self.reflector.run(self.backend, &self.prompts, ctx, inputs)?;
        ctx.with_reflection(run.output, run.provenance)
    }
}

/// Everything a caller supplies for one decision.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    pub input: DecisionInput,
    pub calmness: Option<CalmnessAnswers>,
}

impl DecisionRequest {
    pub fn new(input: DecisionInput) -> Self {
        Self {
            input,
            calmness: None,
        }
    }

    pub fn with_calmness(mut self, answers: CalmnessAnswers) -> Self {
        self.calmness = Some(answers);
        self
    }
}

/// Validate the request, run the pipeline, and score the result when it completes.
///
/// Malformed input (empty scenario, out-of-domain calmness answers) is rejected before any
/// stage runs. A run that ends in `FAILED` is returned as an outcome, not an error.
pub fn run_decision<B: Backend + ?Sized>(
    backend: &B,
    prompt_budget_bytes: usize,
    request: DecisionRequest,
) -> KernelResult<PipelineOutcome> {
    let DecisionRequest { input, calmness } = request;
    let ctx = DecisionContext::new(input, RunMeta::now())?;
    let ctx = match calmness {
        Some(answers) => calmness::attach(&ctx, answers)?,
        None => ctx,
    };
    let pipeline = Pipeline::new(backend, prompt_budget_bytes)?;
    let mut outcome = pipeline.run(ctx);
    if outcome.is_done() {
        outcome.context = decision_index::attach(&outcome.context)?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::KernelError;
    use crate::io::backend::OfflineBackend;
    use crate::test_support::{FailingBackend, ScriptedBackend, sample_input};
    use serde_json::json;

    #[test]
    fn states_walk_in_fixed_order() {
        let mut state = PipelineState::Init;
        let mut seen = vec![state];
        while !state.is_terminal() {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                PipelineState::Init,
                PipelineState::ValidatingIdea,
                PipelineState::AnalyzingMarket,
                PipelineState::AdvisingStrategy,
                PipelineState::Reflecting,
                PipelineState::Done,
            ]
        );
    }

    #[test]
    fn offline_run_reaches_done() {
        let pipeline = Pipeline::new(&OfflineBackend, 16_000).expect("pipeline");
        let ctx = DecisionContext::new(sample_input(), RunMeta::now()).expect("ctx");
        let outcome = pipeline.run(ctx);
        assert_eq!(outcome.state, PipelineState::Done);
        assert_eq!(outcome.transitions.len(), 6);
        assert!(outcome.context.is_complete());
        assert_eq!(outcome.context.meta().provenance.len(), 4);
    }

    /// Verifies an unwrapped backend error halts in FAILED with an explicit marker.
    #[test]
    fn backend_error_without_fallback_fails_the_stage() {
        let backend = FailingBackend::default();
        let pipeline = Pipeline::new(&backend, 16_000).expect("pipeline");
        let ctx = DecisionContext::new(sample_input(), RunMeta::now()).expect("ctx");
        let outcome = pipeline.run(ctx);
        assert_eq!(outcome.state, PipelineState::Failed);
        assert_eq!(
            outcome.transitions,
            vec![
                PipelineState::Init,
                PipelineState::ValidatingIdea,
                PipelineState::Failed
            ]
        );
        let failure = outcome.context.failure().expect("failure marker");
        assert_eq!(failure.stage, Stage::IdeaValidation);
        assert!(outcome.context.stage_outputs().is_empty());
        assert_eq!(backend.calls(), 1);
    }

    /// Verifies reflection on an incomplete context fails before calling the backend.
    #[test]
    fn reflect_checks_precondition_first() {
        let backend = ScriptedBackend::new(Vec::new());
        let pipeline = Pipeline::new(&backend, 16_000).expect("pipeline");
        let ctx = DecisionContext::new(sample_input(), RunMeta::now()).expect("ctx");
        let before = ctx.clone();

        let err = pipeline.reflect(&ctx).unwrap_err();
        assert!(matches!(
            err,
            KernelError::Precondition {
                operation: "reflection",
                ..
            }
        ));
        assert_eq!(ctx, before);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn repaired_fields_are_recorded_in_provenance() {
        let backend = ScriptedBackend::new(vec![
            Ok(json!({"valid": true, "clarity_score": 99})),
            Ok(json!("not an object")),
            Ok(json!({"verdict": "go", "overall_risk_level": "low"})),
            Ok(json!({"consistency_check": true})),
        ]);
        let pipeline = Pipeline::new(&backend, 16_000).expect("pipeline");
        let ctx = DecisionContext::new(sample_input(), RunMeta::now()).expect("ctx");
        let outcome = pipeline.run(ctx);

        assert!(outcome.is_done());
        let meta = outcome.context.meta();
        let idea = meta.provenance_for(Stage::IdeaValidation).expect("idea");
        assert!(idea.repaired_fields.contains(&"clarity_score".to_string()));
        let market = meta.provenance_for(Stage::MarketAnalysis).expect("market");
        assert_eq!(market.repaired_fields.len(), 6);
        assert_eq!(
            backend.calls(),
            vec![
                Stage::IdeaValidation,
                Stage::MarketAnalysis,
                Stage::StrategyAdvice,
                Stage::Reflection
            ]
        );
    }

    #[test]
    fn run_decision_rejects_bad_calmness_before_any_stage() {
        let backend = ScriptedBackend::new(Vec::new());
        let request =
            DecisionRequest::new(sample_input()).with_calmness(CalmnessAnswers::new(0, 0, 5, 0));
        let err = run_decision(&backend, 16_000, request).unwrap_err();
        assert!(matches!(err, KernelError::Validation(_)));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn run_decision_scores_completed_runs() {
        let request =
            DecisionRequest::new(sample_input()).with_calmness(CalmnessAnswers::new(1, 1, 1, 1));
        let outcome = run_decision(&OfflineBackend, 16_000, request).expect("run");
        let extra = outcome.context.extra();
        let calm = extra.calmness.as_ref().expect("calmness");
        let index = extra.decision_index.as_ref().expect("index");
        assert_eq!(index.calm_score, calm.score);
        assert_eq!(
            index,
            &decision_index::score(outcome.context.stage_outputs(), Some(calm))
        );
    }
}

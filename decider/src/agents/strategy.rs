//! Strategy advice: the verdict, its risks and a concrete plan.

use serde_json::Value;
use tracing::instrument;

use crate::agents::StageRun;
use crate::agents::prompt::{PromptBuilder, PromptInputs};
use crate::agents::repair::Repair;
use crate::agents::schema::StageSchema;
use crate::core::context::DecisionContext;
use crate::core::error::KernelResult;
use crate::core::types::{Stage, StrategyAdvice};
use crate::io::backend::Backend;

#[derive(Debug)]
pub struct StrategyAdvisor {
    schema: StageSchema,
}

impl StrategyAdvisor {
    pub fn new() -> KernelResult<Self> {
        Ok(Self {
            schema: StageSchema::load(Stage::StrategyAdvice)?,
        })
    }

    #[instrument(skip_all, fields(stage = "strategy_advice"))]
    pub fn run<B: Backend + ?Sized>(
        &self,
        backend: &B,
        prompts: &PromptBuilder,
        ctx: &DecisionContext,
    ) -> KernelResult<StageRun<StrategyAdvice>> {
        let prompt = prompts.build(Stage::StrategyAdvice, &PromptInputs::from_context(ctx))?;
        let generation = super::generate(backend, &self.schema, &prompt)?;
        Ok(super::finish(&self.schema, generation, repair))
    }
}

pub fn repair(raw: &Value) -> (StrategyAdvice, Vec<String>) {
    let d = StrategyAdvice::default();
    let mut r = Repair::new(raw);
    let output = StrategyAdvice {
        verdict: r.optional_choice("verdict"),
        confidence: r.choice("confidence", d.confidence),
        reasons: r.text_list("reasons"),
        overall_risk_level: r.choice("overall_risk_level", d.overall_risk_level),
        risk_factors: r.records("risk_factors"),
        max_loss_estimate: r.text("max_loss_estimate", &d.max_loss_estimate),
        reversibility: r.choice("reversibility", d.reversibility),
        time_estimate: r.text("time_estimate", &d.time_estimate),
        budget_estimate: r.text("budget_estimate", &d.budget_estimate),
        key_milestones: r.records("key_milestones"),
        critical_resources: r.text_list("critical_resources"),
        gaps: r.text_list("gaps"),
        action_items: r.records("action_items"),
        alternatives: r.text_list("alternatives"),
        one_liner: r.text("one_liner", &d.one_liner),
    };
    (output, r.finish())
}

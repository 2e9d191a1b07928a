//! The decision context threaded through a run.
//!
//! A [`DecisionContext`] is never edited in place. Every write borrows the current snapshot and
//! returns a new one, and the only writers live inside this crate (the pipeline for stage
//! outputs, the scorers for extras). Stage outputs are an append-only log whose order is the
//! fixed stage order.

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::calmness::CalmnessResult;
use crate::core::decision_index::DecisionIndexResult;
use crate::core::error::{KernelError, KernelResult};
use crate::core::types::{
    IdeaValidation, MarketAnalysis, ProviderLabel, Reflection, Stage, StageOutput, StrategyAdvice,
};
use crate::core::variants::{ScenarioPlan, VariantSet};

/// Caller-supplied description of the decision. Set once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub scenario: String,
    #[serde(default)]
    pub current_state: String,
    #[serde(default)]
    pub resources: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Quantified plan used by scenario expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ScenarioPlan>,
}

impl DecisionInput {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            current_state: String::new(),
            resources: String::new(),
            constraints: Vec::new(),
            plan: None,
        }
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.scenario.trim().is_empty() {
            return Err(KernelError::Validation(
                "scenario text must not be empty".to_string(),
            ));
        }
        if let Some(plan) = &self.plan {
            plan.validate()?;
        }
        Ok(())
    }
}

/// Ordered, append-only log of analysis-stage outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<StageOutput>", into = "Vec<StageOutput>")]
pub struct StageOutputs {
    entries: Vec<StageOutput>,
}

impl StageOutputs {
    /// The stage allowed to append next, or `None` once all three are committed.
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ANALYSIS.get(self.entries.len()).copied()
    }

    pub(crate) fn append(&self, output: StageOutput) -> KernelResult<Self> {
        let stage = output.stage();
        match self.next_stage() {
            Some(expected) if expected == stage => {
                let mut entries = self.entries.clone();
                entries.push(output);
                Ok(Self { entries })
            }
            Some(expected) => Err(KernelError::Append {
                stage,
                reason: format!("expected {expected} next"),
            }),
            None => Err(KernelError::Append {
                stage,
                reason: "all analysis stages are already committed".to_string(),
            }),
        }
    }

    pub fn idea(&self) -> Option<&IdeaValidation> {
        self.entries.iter().find_map(|entry| match entry {
            StageOutput::IdeaValidation(idea) => Some(idea),
            _ => None,
        })
    }

    pub fn market(&self) -> Option<&MarketAnalysis> {
        self.entries.iter().find_map(|entry| match entry {
            StageOutput::MarketAnalysis(market) => Some(market),
            _ => None,
        })
    }

    pub fn strategy(&self) -> Option<&StrategyAdvice> {
        self.entries.iter().find_map(|entry| match entry {
            StageOutput::StrategyAdvice(strategy) => Some(strategy),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageOutput> {
        self.entries.iter()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.entries.iter().map(StageOutput::stage).collect()
    }

    /// Analysis stages not yet committed, in order.
    pub fn missing(&self) -> Vec<Stage> {
        Stage::ANALYSIS[self.entries.len()..].to_vec()
    }

    pub fn is_complete(&self) -> bool {
        self.next_stage().is_none()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<Vec<StageOutput>> for StageOutputs {
    type Error = KernelError;

    fn try_from(entries: Vec<StageOutput>) -> KernelResult<Self> {
        entries
            .into_iter()
            .try_fold(StageOutputs::default(), |acc, entry| acc.append(entry))
    }
}

impl From<StageOutputs> for Vec<StageOutput> {
    fn from(outputs: StageOutputs) -> Self {
        outputs.entries
    }
}

/// Where one stage's output came from and what had to be repaired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProvenance {
    pub stage: Stage,
    pub provider: ProviderLabel,
    /// Set when the remote call failed and the offline backend answered instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repaired_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    /// UTC creation time, RFC 3339 with second precision.
    pub created_at: String,
    #[serde(default)]
    pub provenance: Vec<StageProvenance>,
}

impl RunMeta {
    pub fn new(run_id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            created_at: created_at.into(),
            provenance: Vec::new(),
        }
    }

    /// Fresh metadata stamped with the current UTC time and a random suffix.
    pub fn now() -> Self {
        let now = Utc::now();
        let suffix: u32 = rand::thread_rng().r#gen();
        Self::new(
            format!("{}-{suffix:08x}", now.format("%Y%m%dT%H%M%S")),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Random part of the run id (the text after the timestamp).
    pub fn short_id(&self) -> &str {
        self.run_id
            .split_once('-')
            .map_or(self.run_id.as_str(), |(_, suffix)| suffix)
    }

    pub fn provenance_for(&self, stage: Stage) -> Option<&StageProvenance> {
        self.provenance.iter().find(|p| p.stage == stage)
    }
}

/// Explicit marker for a stage that failed with no usable output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

/// Derived artifacts written by the scorers and the variant generator, never by stage agents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Extras {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calmness: Option<CalmnessResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_index: Option<DecisionIndexResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variants: Option<VariantSet>,
}

/// Borrowed view of the three outputs reflection needs.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionInputs<'a> {
    pub idea: &'a IdeaValidation,
    pub market: &'a MarketAnalysis,
    pub strategy: &'a StrategyAdvice,
}

/// The single unit of work for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    input: DecisionInput,
    #[serde(default)]
    stage_outputs: StageOutputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reflection: Option<Reflection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<StageFailure>,
    #[serde(default)]
    extra: Extras,
    meta: RunMeta,
}

impl DecisionContext {
    pub fn new(input: DecisionInput, meta: RunMeta) -> KernelResult<Self> {
        input.validate()?;
        Ok(Self {
            input,
            stage_outputs: StageOutputs::default(),
            reflection: None,
            failure: None,
            extra: Extras::default(),
            meta,
        })
    }

    pub fn input(&self) -> &DecisionInput {
        &self.input
    }

    pub fn stage_outputs(&self) -> &StageOutputs {
        &self.stage_outputs
    }

    pub fn reflection(&self) -> Option<&Reflection> {
        self.reflection.as_ref()
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// All three analysis stages plus reflection are present and nothing failed.
    pub fn is_complete(&self) -> bool {
        !self.is_failed() && self.stage_outputs.is_complete() && self.reflection.is_some()
    }

    pub fn extra(&self) -> &Extras {
        &self.extra
    }

    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    pub(crate) fn with_stage(
        &self,
        output: StageOutput,
        provenance: StageProvenance,
    ) -> KernelResult<Self> {
        self.ensure_open(output.stage())?;
        let stage_outputs = self.stage_outputs.append(output)?;
        let mut next = self.clone();
        next.stage_outputs = stage_outputs;
        next.meta.provenance.push(provenance);
        Ok(next)
    }

    /// Checks the reflection precondition and borrows the three prior outputs.
    pub(crate) fn reflection_inputs(&self) -> KernelResult<ReflectionInputs<'_>> {
        match (
            self.stage_outputs.idea(),
            self.stage_outputs.market(),
            self.stage_outputs.strategy(),
        ) {
            (Some(idea), Some(market), Some(strategy)) => Ok(ReflectionInputs {
                idea,
                market,
                strategy,
            }),
            _ => Err(KernelError::Precondition {
                operation: "reflection",
                missing: self
                    .stage_outputs
                    .missing()
                    .iter()
                    .map(|stage| stage.to_string())
                    .collect(),
            }),
        }
    }

    pub(crate) fn with_reflection(
        &self,
        reflection: Reflection,
        provenance: StageProvenance,
    ) -> KernelResult<Self> {
        self.ensure_open(Stage::Reflection)?;
        self.reflection_inputs()?;
        if self.reflection.is_some() {
            return Err(KernelError::Append {
                stage: Stage::Reflection,
                reason: "reflection is already committed".to_string(),
            });
        }
        let mut next = self.clone();
        next.reflection = Some(reflection);
        next.meta.provenance.push(provenance);
        Ok(next)
    }

    pub(crate) fn with_failure(&self, failure: StageFailure) -> Self {
        let mut next = self.clone();
        next.failure = Some(failure);
        next
    }

    pub(crate) fn with_calmness(&self, calmness: CalmnessResult) -> Self {
        let mut next = self.clone();
        next.extra.calmness = Some(calmness);
        next
    }

    pub(crate) fn with_decision_index(&self, index: DecisionIndexResult) -> Self {
        let mut next = self.clone();
        next.extra.decision_index = Some(index);
        next
    }

    pub(crate) fn with_variants(&self, variants: VariantSet) -> Self {
        let mut next = self.clone();
        next.extra.variants = Some(variants);
        next
    }

    fn ensure_open(&self, stage: Stage) -> KernelResult<()> {
        if let Some(failure) = &self.failure {
            return Err(KernelError::Append {
                stage,
                reason: format!("run already failed at {}", failure.stage),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ProviderLabel, StageOutput};

    fn provenance(stage: Stage) -> StageProvenance {
        StageProvenance {
            stage,
            provider: ProviderLabel::Offline,
            fallback_reason: None,
            repaired_fields: Vec::new(),
        }
    }

    fn fresh() -> DecisionContext {
        DecisionContext::new(
            DecisionInput::new("open a coffee shop"),
            RunMeta::new("20260101T000000-00000000", "2026-01-01T00:00:00Z"),
        )
        .expect("context")
    }

    #[test]
    fn empty_scenario_is_rejected() {
        let err = DecisionContext::new(DecisionInput::new("   "), RunMeta::now()).unwrap_err();
        assert!(matches!(err, KernelError::Validation(_)));
    }

    /// Verifies stage outputs only accept the next stage in the fixed order.
    #[test]
    fn out_of_order_append_is_rejected() {
        let ctx = fresh();
        let err = ctx
            .with_stage(
                StageOutput::MarketAnalysis(MarketAnalysis::default()),
                provenance(Stage::MarketAnalysis),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::Append {
                stage: Stage::MarketAnalysis,
                ..
            }
        ));
        assert!(ctx.stage_outputs().is_empty());
    }

    /// Verifies appending returns a new snapshot and leaves the original untouched.
    #[test]
    fn with_stage_leaves_previous_snapshot_untouched() {
        let ctx = fresh();
        let next = ctx
            .with_stage(
                StageOutput::IdeaValidation(IdeaValidation::default()),
                provenance(Stage::IdeaValidation),
            )
            .expect("append");
        assert!(ctx.stage_outputs().is_empty());
        assert!(ctx.meta().provenance.is_empty());
        assert_eq!(next.stage_outputs().stages(), vec![Stage::IdeaValidation]);
        assert_eq!(next.stage_outputs().next_stage(), Some(Stage::MarketAnalysis));
    }

    #[test]
    fn duplicate_stage_cannot_overwrite() {
        let ctx = fresh()
            .with_stage(
                StageOutput::IdeaValidation(IdeaValidation::default()),
                provenance(Stage::IdeaValidation),
            )
            .expect("append");
        let err = ctx
            .with_stage(
                StageOutput::IdeaValidation(IdeaValidation::default()),
                provenance(Stage::IdeaValidation),
            )
            .unwrap_err();
        assert!(matches!(err, KernelError::Append { .. }));
    }

    #[test]
    fn reflection_requires_all_prior_stages() {
        let ctx = fresh()
            .with_stage(
                StageOutput::IdeaValidation(IdeaValidation::default()),
                provenance(Stage::IdeaValidation),
            )
            .expect("append");
        let err = ctx
            .with_reflection(Reflection::default(), provenance(Stage::Reflection))
            .unwrap_err();
        match err {
            KernelError::Precondition { operation, missing } => {
                assert_eq!(operation, "reflection");
                assert_eq!(missing, vec!["market_analysis", "strategy_advice"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(ctx.reflection().is_none());
    }

    #[test]
    fn failed_context_rejects_further_stages() {
        let ctx = fresh().with_failure(StageFailure {
            stage: Stage::IdeaValidation,
            message: "boom".to_string(),
        });
        let err = ctx
            .with_stage(
                StageOutput::IdeaValidation(IdeaValidation::default()),
                provenance(Stage::IdeaValidation),
            )
            .unwrap_err();
        assert!(matches!(err, KernelError::Append { .. }));
    }

    /// Verifies a persisted record with reordered stage outputs fails to load.
    #[test]
    fn deserializing_reordered_outputs_fails() {
        let raw = serde_json::json!([
            {"stage": "market_analysis", "output": {}},
            {"stage": "idea_validation", "output": {}}
        ]);
        let err = serde_json::from_value::<StageOutputs>(raw).unwrap_err();
        assert!(err.to_string().contains("cannot append market_analysis"));
    }

    #[test]
    fn run_meta_short_id_is_random_suffix() {
        let meta = RunMeta::now();
        assert_eq!(meta.short_id().len(), 8);
        assert!(meta.created_at.ends_with('Z'));
    }
}

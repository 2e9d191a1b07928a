//! Idea validation: is the scenario clear enough to analyse?

use serde_json::Value;
use tracing::instrument;

use crate::agents::StageRun;
use crate::agents::prompt::{PromptBuilder, PromptInputs};
use crate::agents::repair::Repair;
use crate::agents::schema::StageSchema;
use crate::core::context::DecisionContext;
use crate::core::error::KernelResult;
use crate::core::types::{IdeaValidation, Stage};
use crate::io::backend::Backend;

const CLARITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

#[derive(Debug)]
pub struct IdeaValidator {
    schema: StageSchema,
}

impl IdeaValidator {
    pub fn new() -> KernelResult<Self> {
        Ok(Self {
            schema: StageSchema::load(Stage::IdeaValidation)?,
        })
    }

    #[instrument(skip_all, fields(stage = "idea_validation"))]
    pub fn run<B: Backend + ?Sized>(
        &self,
        backend: &B,
        prompts: &PromptBuilder,
        ctx: &DecisionContext,
    ) -> KernelResult<StageRun<IdeaValidation>> {
        let prompt = prompts.build(Stage::IdeaValidation, &PromptInputs::from_context(ctx))?;
        let generation = super::generate(backend, &self.schema, &prompt)?;
        Ok(super::finish(&self.schema, generation, repair))
    }
}

/// Repair a raw value into an [`IdeaValidation`], listing defaulted fields.
pub fn repair(raw: &Value) -> (IdeaValidation, Vec<String>) {
    let defaults = IdeaValidation::default();
    let mut r = Repair::new(raw);
    let output = IdeaValidation {
        valid: r.bool("valid", defaults.valid),
        clarity_score: r.int_in("clarity_score", CLARITY_RANGE, defaults.clarity_score),
        summary: r.text("summary", &defaults.summary),
        assumptions: r.text_list("assumptions"),
        missing_info: r.text_list("missing_info"),
        suggested_refinement: r.text("suggested_refinement", &defaults.suggested_refinement),
    };
    (output, r.finish())
}

//! Market analysis: size, trend and competition around the scenario.

use serde_json::Value;
use tracing::instrument;

use crate::agents::StageRun;
use crate::agents::prompt::{PromptBuilder, PromptInputs};
use crate::agents::repair::Repair;
use crate::agents::schema::StageSchema;
use crate::core::context::DecisionContext;
use crate::core::error::KernelResult;
use crate::core::types::{MarketAnalysis, Stage};
use crate::io::backend::Backend;

#[derive(Debug)]
pub struct MarketAnalyst {
    schema: StageSchema,
}

impl MarketAnalyst {
    pub fn new() -> KernelResult<Self> {
        Ok(Self {
            schema: StageSchema::load(Stage::MarketAnalysis)?,
        })
    }

    #[instrument(skip_all, fields(stage = "market_analysis"))]
    pub fn run<B: Backend + ?Sized>(
        &self,
        backend: &B,
        prompts: &PromptBuilder,
        ctx: &DecisionContext,
    ) -> KernelResult<StageRun<MarketAnalysis>> {
        let prompt = prompts.build(Stage::MarketAnalysis, &PromptInputs::from_context(ctx))?;
        let generation = super::generate(backend, &self.schema, &prompt)?;
        Ok(super::finish(&self.schema, generation, repair))
    }
}

pub fn repair(raw: &Value) -> (MarketAnalysis, Vec<String>) {
    let defaults = MarketAnalysis::default();
    let mut r = Repair::new(raw);
    let output = MarketAnalysis {
        market_size: r.choice("market_size", defaults.market_size),
        trend: r.choice("trend", defaults.trend),
        competition_level: r.choice("competition_level", defaults.competition_level),
        key_competitors: r.text_list("key_competitors"),
        opportunity_summary: r.text("opportunity_summary", &defaults.opportunity_summary),
        risks: r.text_list("risks"),
    };
    (output, r.finish())
}

//! Embedded stage schemas and the structural check run before repair.

use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::core::error::{KernelError, KernelResult};
use crate::core::types::Stage;

const IDEA_SCHEMA: &str = include_str!("../../schemas/idea_validation.schema.json");
const MARKET_SCHEMA: &str = include_str!("../../schemas/market_analysis.schema.json");
const STRATEGY_SCHEMA: &str = include_str!("../../schemas/strategy_advice.schema.json");
const REFLECTION_SCHEMA: &str = include_str!("../../schemas/reflection.schema.json");

/// Raw schema text for `stage`.
pub fn schema_source(stage: Stage) -> &'static str {
    match stage {
        Stage::IdeaValidation => IDEA_SCHEMA,
        Stage::MarketAnalysis => MARKET_SCHEMA,
        Stage::StrategyAdvice => STRATEGY_SCHEMA,
        Stage::Reflection => REFLECTION_SCHEMA,
    }
}

/// A stage's parsed schema plus its compiled validator (Draft 2020-12).
pub struct StageSchema {
    stage: Stage,
    value: Value,
    validator: Validator,
}

impl std::fmt::Debug for StageSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSchema")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl StageSchema {
    pub fn load(stage: Stage) -> KernelResult<Self> {
        let value: Value = serde_json::from_str(schema_source(stage))
            .map_err(|err| KernelError::stage(stage, format!("parse schema: {err}")))?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&value)
            .map_err(|err| KernelError::stage(stage, format!("compile schema: {err}")))?;
        Ok(Self {
            stage,
            value,
            validator,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Every structural violation of `instance`, as readable messages.
    pub fn violations(&self, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::backend::OfflineBackend;

    /// Verifies every embedded schema compiles and accepts its own offline synthesis.
    #[test]
    fn offline_synthesis_validates_for_every_stage() {
        for stage in [
            Stage::IdeaValidation,
            Stage::MarketAnalysis,
            Stage::StrategyAdvice,
            Stage::Reflection,
        ] {
            let schema = StageSchema::load(stage).expect("schema");
            let value = OfflineBackend::synthesize(schema.value());
            assert_eq!(schema.violations(&value), Vec::<String>::new(), "{stage}");
        }
    }

    #[test]
    fn out_of_range_values_are_reported() {
        let schema = StageSchema::load(Stage::IdeaValidation).expect("schema");
        let mut value = OfflineBackend::synthesize(schema.value());
        value["clarity_score"] = Value::from(42);
        assert!(!schema.violations(&value).is_empty());
    }
}

//! Reflection: cross-checks the three analysis outputs.
//!
//! The backend's review is merged with the fixed rules in [`crate::core::consistency`]. A rule
//! hit always wins: it forces `consistency_check = false` and caps confidence at medium.

use serde_json::Value;
use tracing::{info, instrument};

use crate::agents::StageRun;
use crate::agents::prompt::{PromptBuilder, PromptInputs};
use crate::agents::repair::Repair;
use crate::agents::schema::StageSchema;
use crate::core::consistency::find_conflicts;
use crate::core::context::{DecisionContext, ReflectionInputs};
use crate::core::error::KernelResult;
use crate::core::types::{Level, Reflection, Stage};
use crate::io::backend::Backend;

/// Conflict entry used when nothing disagrees.
pub const NO_CONFLICTS: &str = "stages are consistent; no conflicts found";

const MIN_SUGGESTED_ACTIONS: usize = 2;
const DEFAULT_ACTIONS: [&str; 3] = [
    "Fill in the target market and budget, then run the analysis again",
    "Talk to three people who have made a similar decision",
    "Schedule a review checkpoint three months from now",
];

#[derive(Debug)]
pub struct Reflector {
    schema: StageSchema,
}

impl Reflector {
    pub fn new() -> KernelResult<Self> {
        Ok(Self {
            schema: StageSchema::load(Stage::Reflection)?,
        })
    }

    /// Runs reflection over outputs whose presence the caller has already checked.
    #[instrument(skip_all, fields(stage = "reflection"))]
    pub fn run<B: Backend + ?Sized>(
        &self,
        backend: &B,
        prompts: &PromptBuilder,
        ctx: &DecisionContext,
        inputs: ReflectionInputs<'_>,
    ) -> KernelResult<StageRun<Reflection>> {
        let prompt = prompts.build(Stage::Reflection, &PromptInputs::from_context(ctx))?;
        let generation = super::generate(backend, &self.schema, &prompt)?;
        let mut run = super::finish(&self.schema, generation, repair);
        let rule_conflicts = find_conflicts(&inputs);
        if !rule_conflicts.is_empty() {
            info!(conflicts = rule_conflicts.len(), "consistency rules flagged conflicts");
        }
        run.output = reconcile(run.output, rule_conflicts);
        Ok(run)
    }
}

pub fn repair(raw: &Value) -> (Reflection, Vec<String>) {
    let d = Reflection::default();
    let mut r = Repair::new(raw);
    let output = Reflection {
        consistency_check: r.bool("consistency_check", d.consistency_check),
        conflicts: r.text_list("conflicts"),
        summary: r.text("summary", &d.summary),
        suggested_actions: r.text_list("suggested_actions"),
        confidence_in_outputs: r.choice("confidence_in_outputs", d.confidence_in_outputs),
    };
    (output, r.finish())
}

/// Merge rule conflicts into the backend's review and normalize list fields.
pub fn reconcile(mut reflection: Reflection, rule_conflicts: Vec<String>) -> Reflection {
    let flagged = !rule_conflicts.is_empty();
    let mut conflicts = rule_conflicts;
    for conflict in reflection.conflicts.drain(..) {
        if conflict != NO_CONFLICTS && !conflicts.contains(&conflict) {
            conflicts.push(conflict);
        }
    }
    if flagged {
        reflection.consistency_check = false;
        reflection.confidence_in_outputs = reflection.confidence_in_outputs.min(Level::Medium);
    }
    if conflicts.is_empty() {
        conflicts.push(NO_CONFLICTS.to_string());
    }
    reflection.conflicts = conflicts;

    for action in DEFAULT_ACTIONS {
        if reflection.suggested_actions.len() >= MIN_SUGGESTED_ACTIONS {
            break;
        }
        if !reflection.suggested_actions.iter().any(|a| a == action) {
            reflection.suggested_actions.push(action.to_string());
        }
    }
    reflection
}

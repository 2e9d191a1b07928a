//! Stage agents: prompt, generate, check, repair.
//!
//! Every agent follows the same sequence. It renders its prompt from the context, asks the
//! backend for a value shaped by the stage schema, checks the value structurally, and then
//! repairs it field by field into the typed output. Repair never fails, so the only errors an
//! agent returns are ones no defaulting can fix (prompt rendering, an unwrapped backend error).

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::context::StageProvenance;
use crate::core::error::{KernelError, KernelResult};
use crate::io::backend::{Backend, GenerateRequest, Generation};

pub mod idea;
pub mod market;
pub mod prompt;
pub mod reflection;
pub(crate) mod repair;
pub mod schema;
pub mod strategy;

use prompt::PromptPack;
use schema::StageSchema;

/// Typed output of one stage plus the provenance entry to record for it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRun<T> {
    pub output: T,
    pub provenance: StageProvenance,
}

pub(crate) fn generate<B: Backend + ?Sized>(
    backend: &B,
    schema: &StageSchema,
    prompt: &PromptPack,
) -> KernelResult<Generation> {
    let stage = schema.stage();
    let generation = backend
        .generate(&GenerateRequest {
            stage,
            prompt: prompt.as_str(),
            schema: schema.value(),
        })
        .map_err(|err| KernelError::stage(stage, format!("backend error: {err}")))?;
    let violations = schema.violations(&generation.value);
    if violations.is_empty() {
        debug!(stage = %stage, provider = generation.provider.as_str(), "stage output passed schema check");
    } else {
        warn!(
            stage = %stage,
            violations = violations.len(),
            first = %violations[0],
            "stage output failed schema check; repairing"
        );
    }
    Ok(generation)
}

pub(crate) fn finish<T>(
    schema: &StageSchema,
    generation: Generation,
    repair: fn(&Value) -> (T, Vec<String>),
) -> StageRun<T> {
    let (output, repaired_fields) = repair(&generation.value);
    if !repaired_fields.is_empty() {
        debug!(stage = %schema.stage(), fields = ?repaired_fields, "repaired stage fields");
    }
    StageRun {
        output,
        provenance: StageProvenance {
            stage: schema.stage(),
            provider: generation.provider,
            fallback_reason: generation.fallback_reason,
            repaired_fields,
        },
    }
}

//! Scenario expansion: run the pipeline once per execution variant and compare the results.
//!
//! The three variant runs are independent, so each gets its own scoped thread and its own
//! context. Only the backend is shared, by reference.

use std::thread;

use tracing::{info, instrument, warn};

use crate::core::compare::{VariantComparison, compare};
use crate::core::decision_index::DecisionIndexResult;
use crate::core::error::{KernelError, KernelResult};
use crate::core::variants::{self, VariantKind, VariantSet};
use crate::io::backend::Backend;
use crate::pipeline::{DecisionRequest, PipelineOutcome, run_decision};

#[derive(Debug, Clone, PartialEq)]
pub struct VariantRun {
    pub kind: VariantKind,
    pub outcome: PipelineOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub variants: VariantSet,
    /// One run per variant, in variant order.
    pub runs: Vec<VariantRun>,
    /// Present only when every variant run completed and was scored.
    pub comparison: Option<VariantComparison>,
}

impl Expansion {
    pub fn run(&self, kind: VariantKind) -> Option<&VariantRun> {
        self.runs.iter().find(|run| run.kind == kind)
    }
}

/// Derive the three variants from `request.input.plan` and run each through the pipeline.
///
/// The current-variant context also carries the full variant set.
#[instrument(skip_all)]
pub fn expand_and_run<B: Backend + ?Sized>(
    backend: &B,
    prompt_budget_bytes: usize,
    request: DecisionRequest,
) -> KernelResult<Expansion> {
    request.input.validate()?;
    if let Some(answers) = &request.calmness {
        answers.validate()?;
    }
    let variants = variants::expand(&request.input)?;
    let calmness = request.calmness;

    let results: Vec<(VariantKind, KernelResult<PipelineOutcome>)> = thread::scope(|scope| {
        let handles: Vec<_> = variants
            .iter()
            .map(|variant| {
                let kind = variant.kind;
                let input = variant.input.clone();
                let handle = scope.spawn(move || {
                    run_decision(backend, prompt_budget_bytes, DecisionRequest { input, calmness })
                });
                (kind, handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(kind, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    warn!(variant = %kind, "variant worker panicked");
                    Err(KernelError::Worker(kind.to_string()))
                });
                (kind, result)
            })
            .collect()
    });

    let mut runs = Vec::with_capacity(results.len());
    for (kind, result) in results {
        let mut outcome = result?;
        if kind == VariantKind::Current {
            outcome.context = variants::attach(&outcome.context)?;
        }
        info!(variant = %kind, state = outcome.state.as_str(), "variant run finished");
        runs.push(VariantRun { kind, outcome });
    }

    let scored: Vec<(VariantKind, &DecisionIndexResult)> = runs
        .iter()
        .filter_map(|run| {
            run.outcome
                .context
                .extra()
                .decision_index
                .as_ref()
                .map(|index| (run.kind, index))
        })
        .collect();
    let comparison = if scored.len() == runs.len() {
        compare(&scored)
    } else {
        warn!(
            scored = scored.len(),
            runs = runs.len(),
            "skipping comparison; not every variant completed"
        );
        None
    };

    Ok(Expansion {
        variants,
        runs,
        comparison,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::variants::ScenarioPlan;
    use crate::io::backend::OfflineBackend;
    use crate::test_support::{FailingBackend, sample_input, sample_plan};

    #[test]
    fn input_without_plan_is_rejected() {
        let err = expand_and_run(&OfflineBackend, 16_000, DecisionRequest::new(sample_input()))
            .unwrap_err();
        assert!(matches!(err, KernelError::Validation(_)));
    }

    #[test]
    fn plan_that_overflows_a_variant_fails_before_any_run() {
        let mut input = sample_input();
        input.plan = Some(ScenarioPlan {
            max_loss: 1e308,
            ..sample_plan()
        });
        let backend = FailingBackend::default();
        let err = expand_and_run(&backend, 16_000, DecisionRequest::new(input)).unwrap_err();
        assert!(matches!(err, KernelError::Validation(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn only_the_current_run_carries_the_variant_set() {
        let mut input = sample_input();
        input.plan = Some(sample_plan());
        let expansion =
            expand_and_run(&OfflineBackend, 16_000, DecisionRequest::new(input)).expect("expand");

        assert_eq!(expansion.runs.len(), 3);
        for run in &expansion.runs {
            let carried = run.outcome.context.extra().variants.as_ref();
            if run.kind == VariantKind::Current {
                assert_eq!(carried, Some(&expansion.variants));
            } else {
                assert!(carried.is_none());
            }
        }
    }
}

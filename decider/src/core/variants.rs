//! Scenario variants: conservative, current and aggressive rewrites of one plan.
//!
//! Adjustments are table-driven multipliers so expansion is reproducible and never needs a
//! backend.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::context::{DecisionContext, DecisionInput};
use crate::core::error::{KernelError, KernelResult};

/// Quantified plan behind a scenario. Every dimension must be finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioPlan {
    pub time_horizon_months: f64,
    pub monthly_budget: f64,
    pub validation_window_weeks: f64,
    pub outputs_per_week: f64,
    pub max_loss: f64,
    /// Measurable bar that counts as success (e.g. paying customers); higher is stricter.
    pub success_bar: f64,
    /// Allowed deviation from stated constraints, in percent; lower is stricter.
    pub constraint_tolerance_pct: f64,
}

impl ScenarioPlan {
    pub fn validate(&self) -> KernelResult<()> {
        let invalid: Vec<&str> = Dimension::ALL
            .iter()
            .filter(|dim| {
                let value = dim.get(self);
                !value.is_finite() || value <= 0.0
            })
            .map(|dim| dim.as_str())
            .collect();
        if invalid.is_empty() {
            return Ok(());
        }
        Err(KernelError::Validation(format!(
            "plan dimensions must be finite and > 0: {}",
            invalid.join(", ")
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    TimeHorizon,
    Budget,
    ValidationWindow,
    OutputCadence,
    RiskExposure,
    SuccessCriteria,
    ConstraintCompliance,
}

/// (dimension, conservative multiplier, aggressive multiplier)
const ADJUSTMENTS: [(Dimension, f64, f64); 7] = [
    (Dimension::TimeHorizon, 1.5, 0.5),
    (Dimension::Budget, 0.5, 1.5),
    (Dimension::ValidationWindow, 1.5, 0.5),
    (Dimension::OutputCadence, 0.5, 2.0),
    (Dimension::RiskExposure, 0.5, 2.0),
    (Dimension::SuccessCriteria, 1.5, 0.75),
    (Dimension::ConstraintCompliance, 0.5, 2.0),
];

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Dimension::TimeHorizon,
        Dimension::Budget,
        Dimension::ValidationWindow,
        Dimension::OutputCadence,
        Dimension::RiskExposure,
        Dimension::SuccessCriteria,
        Dimension::ConstraintCompliance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::TimeHorizon => "time_horizon_months",
            Dimension::Budget => "monthly_budget",
            Dimension::ValidationWindow => "validation_window_weeks",
            Dimension::OutputCadence => "outputs_per_week",
            Dimension::RiskExposure => "max_loss",
            Dimension::SuccessCriteria => "success_bar",
            Dimension::ConstraintCompliance => "constraint_tolerance_pct",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Dimension::TimeHorizon => "time horizon (months)",
            Dimension::Budget => "monthly budget",
            Dimension::ValidationWindow => "validation window (weeks)",
            Dimension::OutputCadence => "outputs per week",
            Dimension::RiskExposure => "maximum acceptable loss",
            Dimension::SuccessCriteria => "success bar",
            Dimension::ConstraintCompliance => "constraint tolerance (%)",
        }
    }

    pub fn get(self, plan: &ScenarioPlan) -> f64 {
        match self {
            Dimension::TimeHorizon => plan.time_horizon_months,
            Dimension::Budget => plan.monthly_budget,
            Dimension::ValidationWindow => plan.validation_window_weeks,
            Dimension::OutputCadence => plan.outputs_per_week,
            Dimension::RiskExposure => plan.max_loss,
            Dimension::SuccessCriteria => plan.success_bar,
            Dimension::ConstraintCompliance => plan.constraint_tolerance_pct,
        }
    }

    fn slot(self, plan: &mut ScenarioPlan) -> &mut f64 {
        match self {
            Dimension::TimeHorizon => &mut plan.time_horizon_months,
            Dimension::Budget => &mut plan.monthly_budget,
            Dimension::ValidationWindow => &mut plan.validation_window_weeks,
            Dimension::OutputCadence => &mut plan.outputs_per_week,
            Dimension::RiskExposure => &mut plan.max_loss,
            Dimension::SuccessCriteria => &mut plan.success_bar,
            Dimension::ConstraintCompliance => &mut plan.constraint_tolerance_pct,
        }
    }

    /// Multiplier applied for `kind`; `Current` is the identity.
    pub fn multiplier(self, kind: VariantKind) -> f64 {
        let (_, conservative, aggressive) = ADJUSTMENTS
            .iter()
            .find(|(dim, _, _)| *dim == self)
            .copied()
            .unwrap_or((self, 1.0, 1.0));
        match kind {
            VariantKind::Conservative => conservative,
            VariantKind::Current => 1.0,
            VariantKind::Aggressive => aggressive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    Conservative,
    Current,
    Aggressive,
}

impl VariantKind {
    pub const ALL: [VariantKind; 3] = [
        VariantKind::Conservative,
        VariantKind::Current,
        VariantKind::Aggressive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VariantKind::Conservative => "conservative",
            VariantKind::Current => "current",
            VariantKind::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioVariant {
    pub kind: VariantKind,
    pub plan: ScenarioPlan,
    /// Pipeline input for this variant: the original input plus the rendered strategy note.
    pub input: DecisionInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSet {
    pub conservative: ScenarioVariant,
    pub current: ScenarioVariant,
    pub aggressive: ScenarioVariant,
}

impl VariantSet {
    pub fn get(&self, kind: VariantKind) -> &ScenarioVariant {
        match kind {
            VariantKind::Conservative => &self.conservative,
            VariantKind::Current => &self.current,
            VariantKind::Aggressive => &self.aggressive,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScenarioVariant> {
        [&self.conservative, &self.current, &self.aggressive].into_iter()
    }
}

fn adjust(plan: &ScenarioPlan, kind: VariantKind) -> ScenarioPlan {
    let mut adjusted = *plan;
    for dim in Dimension::ALL {
        *dim.slot(&mut adjusted) = dim.get(plan) * dim.multiplier(kind);
    }
    adjusted
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// Renders the plan as the strategy note appended to a variant's background.
fn strategy_note(kind: VariantKind, plan: &ScenarioPlan) -> String {
    let mut note = format!("[Execution strategy: {kind}]");
    for dim in Dimension::ALL {
        note.push_str(&format!("\n- {}: {}", dim.label(), format_amount(dim.get(plan))));
    }
    note
}

fn variant(input: &DecisionInput, plan: &ScenarioPlan, kind: VariantKind) -> ScenarioVariant {
    if kind == VariantKind::Current {
        return ScenarioVariant {
            kind,
            plan: *plan,
            input: input.clone(),
        };
    }
    let adjusted = adjust(plan, kind);
    let note = strategy_note(kind, &adjusted);
    let current_state = if input.current_state.trim().is_empty() {
        note
    } else {
        format!("{}\n\n{note}", input.current_state.trim_end())
    };
    ScenarioVariant {
        kind,
        plan: adjusted,
        input: DecisionInput {
            current_state,
            plan: Some(adjusted),
            ..input.clone()
        },
    }
}

/// Expands an input with a plan into its three sibling variants.
pub fn expand(input: &DecisionInput) -> KernelResult<VariantSet> {
    input.validate()?;
    let plan = input.plan.ok_or_else(|| {
        KernelError::Validation("scenario expansion requires a plan".to_string())
    })?;
    let set = VariantSet {
        conservative: variant(input, &plan, VariantKind::Conservative),
        current: variant(input, &plan, VariantKind::Current),
        aggressive: variant(input, &plan, VariantKind::Aggressive),
    };
    // A multiplier can push a huge but finite value past f64::MAX.
    for kind in [VariantKind::Conservative, VariantKind::Aggressive] {
        set.get(kind).plan.validate().map_err(|err| match err {
            KernelError::Validation(reason) => {
                KernelError::Validation(format!("{kind} variant: {reason}"))
            }
            other => other,
        })?;
    }
    Ok(set)
}

/// Expands the context's input and records the variant set on a new snapshot.
pub fn attach(ctx: &DecisionContext) -> KernelResult<DecisionContext> {
    Ok(ctx.with_variants(expand(ctx.input())?))
}

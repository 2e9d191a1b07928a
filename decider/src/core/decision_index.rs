//! Decision index: rule-table sub-scores blended with the calmness score.
//!
//! Four sub-scores (feasibility, market, risk, resource) are read from the committed stage
//! outputs through fixed lookup tables and summed into a 0..=100 base score. The final index
//! weights the base at 85% and the calmness score at 15%. Missing upstream data never fails the
//! scorer; it degrades to [`DEFAULT_SUB_SCORE`] and the substitution is noted in `fallbacks`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::{idea, market, strategy};
use crate::core::calmness::{CalmState, CalmnessResult};
use crate::core::context::{DecisionContext, StageOutputs};
use crate::core::error::{KernelError, KernelResult};
use crate::core::types::{
    Level, MarketSize, Recommendation, Stage, StageOutput, Trend, is_informative,
};

pub const SUB_SCORE_MAX: u8 = 25;
/// Mid-range sub-score used when the source stage is missing.
pub const DEFAULT_SUB_SCORE: u8 = 12;
/// Calm score assumed when no calmness check was taken.
pub const DEFAULT_CALM_SCORE: u8 = 100;

const BASE_WEIGHT: u32 = 85;
const CALM_WEIGHT: u32 = 15;

const INVALID_IDEA_SCORE: u8 = 5;
const FEASIBILITY_FLOOR: i16 = 5;
const CLARITY_WEIGHT: i16 = 2;
const CLARITY_MIN: u8 = 1;
const CLARITY_MAX: u8 = 10;

const MARKET_BASE: i16 = 12;
const TREND_ADJUST: [(Trend, i16); 3] = [
    (Trend::Rising, 5),
    (Trend::Flat, 0),
    (Trend::Declining, -5),
];
const COMPETITION_ADJUST: [(Level, i16); 3] =
    [(Level::Low, 4), (Level::Medium, 0), (Level::High, -4)];
const SIZE_ADJUST: [(MarketSize, i16); 3] = [
    (MarketSize::Large, 2),
    (MarketSize::Medium, 0),
    (MarketSize::Small, -2),
];

const RISK_SCORES: [(Level, u8); 3] = [(Level::Low, 22), (Level::Medium, 14), (Level::High, 6)];

const RESOURCE_READY: u8 = 20;
const RESOURCE_ESTIMATED: u8 = 16;
const RESOURCE_UNKNOWN: u8 = 14;
const RESOURCE_MANY_GAPS: u8 = 8;
const MANY_GAPS: usize = 2;

/// Lower bound (inclusive) of each grade, highest first.
const GRADE_BANDS: [(u8, Grade); 4] = [
    (80, Grade::A),
    (60, Grade::B),
    (40, Grade::C),
    (0, Grade::D),
];

const GRADE_FALLBACK: [(Grade, Recommendation); 4] = [
    (Grade::A, Recommendation::Go),
    (Grade::B, Recommendation::Cautious),
    (Grade::C, Recommendation::Delay),
    (Grade::D, Recommendation::DoNot),
];

const MAX_UNCERTAINTIES_PER_STAGE: usize = 3;
const MAX_ACTION_STEPS: usize = 5;

/// Listed when no stage named a missing piece or gap.
pub const NO_CLEAR_UNCERTAINTY: &str = "no clear uncertainty identified yet";
/// Listed when no stage proposed a concrete next step.
pub const RERUN_STEP: &str = "fill in the missing details and run the decision again";

fn lookup<K: PartialEq + Copy, V: Copy>(table: &[(K, V)], key: K, default: V) -> V {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map_or(default, |(_, v)| *v)
}

fn clamp_sub_score(raw: i16) -> u8 {
    u8::try_from(raw.clamp(0, i16::from(SUB_SCORE_MAX))).unwrap_or(SUB_SCORE_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    pub fn from_score(score: u8) -> Self {
        GRADE_BANDS
            .iter()
            .find(|(floor, _)| score >= *floor)
            .map_or(Grade::D, |(_, grade)| *grade)
    }

    pub fn fallback_recommendation(self) -> Recommendation {
        lookup(&GRADE_FALLBACK, self, Recommendation::Delay)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        };
        f.write_str(letter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubScores {
    pub feasibility: u8,
    pub market: u8,
    pub risk: u8,
    pub resource: u8,
}

impl SubScores {
    pub fn base(&self) -> u8 {
        self.feasibility + self.market + self.risk + self.resource
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionIndexResult {
    pub score: u8,
    pub base_score: u8,
    pub calm_score: u8,
    pub calm_state: CalmState,
    pub sub_scores: SubScores,
    pub grade: Grade,
    pub recommendation: Recommendation,
    /// The label before calmness gating; equal to `recommendation` when calm.
    pub unguarded_recommendation: Recommendation,
    pub risk_label: Level,
    pub prescriptions: Vec<String>,
    pub key_uncertainties: Vec<String>,
    pub next_steps: Vec<String>,
    /// Notes on every sub-score that fell back to its default.
    pub fallbacks: Vec<String>,
}

/// `round(base * 0.85 + calm * 0.15)` in integer arithmetic, clamped to 0..=100.
pub fn final_index(base: u8, calm: u8) -> u8 {
    let weighted = (u32::from(base) * BASE_WEIGHT + u32::from(calm) * CALM_WEIGHT + 50) / 100;
    u8::try_from(weighted.min(100)).unwrap_or(100)
}

fn sub_scores(outputs: &StageOutputs, fallbacks: &mut Vec<String>) -> SubScores {
    let mut missing = |name: &str, stage: &str| {
        fallbacks.push(format!(
            "{name}: {stage} output missing, used {DEFAULT_SUB_SCORE}"
        ));
        DEFAULT_SUB_SCORE
    };

    let feasibility = match outputs.idea() {
        Some(idea) if !idea.valid => INVALID_IDEA_SCORE,
        Some(idea) => {
            let clarity = idea.clarity_score.clamp(CLARITY_MIN, CLARITY_MAX);
            clamp_sub_score(FEASIBILITY_FLOOR + CLARITY_WEIGHT * i16::from(clarity))
        }
        None => missing("feasibility", "idea_validation"),
    };

    let market = match outputs.market() {
        Some(market) => clamp_sub_score(
            MARKET_BASE
                + lookup(&TREND_ADJUST, market.trend, 0)
                + lookup(&COMPETITION_ADJUST, market.competition_level, 0)
                + lookup(&SIZE_ADJUST, market.market_size, 0),
        ),
        None => missing("market", "market_analysis"),
    };

    let (risk, resource) = match outputs.strategy() {
        Some(strategy) => {
            let risk = lookup(&RISK_SCORES, strategy.overall_risk_level, DEFAULT_SUB_SCORE);
            let has_estimate =
                is_informative(&strategy.time_estimate) || is_informative(&strategy.budget_estimate);
            let resource = if strategy.gaps.is_empty() && has_estimate {
                RESOURCE_READY
            } else if strategy.gaps.len() > MANY_GAPS {
                RESOURCE_MANY_GAPS
            } else if has_estimate {
                RESOURCE_ESTIMATED
            } else {
                RESOURCE_UNKNOWN
            };
            (risk, resource)
        }
        None => (
            missing("risk", "strategy_advice"),
            missing("resource", "strategy_advice"),
        ),
    };

    SubScores {
        feasibility,
        market,
        risk,
        resource,
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    let item = item.trim();
    if !item.is_empty() && !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

fn key_uncertainties(outputs: &StageOutputs) -> Vec<String> {
    let mut uncertainties = Vec::new();
    if let Some(idea) = outputs.idea() {
        for item in idea.missing_info.iter().take(MAX_UNCERTAINTIES_PER_STAGE) {
            push_unique(&mut uncertainties, item);
        }
    }
    if let Some(strategy) = outputs.strategy() {
        for gap in strategy.gaps.iter().take(MAX_UNCERTAINTIES_PER_STAGE) {
            push_unique(&mut uncertainties, gap);
        }
    }
    if uncertainties.is_empty() {
        uncertainties.push(NO_CLEAR_UNCERTAINTY.to_string());
    }
    uncertainties
}

fn next_steps(outputs: &StageOutputs) -> Vec<String> {
    let mut steps = Vec::new();
    if let Some(strategy) = outputs.strategy() {
        for item in strategy.action_items.iter().take(MAX_ACTION_STEPS) {
            let step = if is_informative(&item.timeline) {
                format!("[{}] {} ({})", item.priority, item.action.trim(), item.timeline.trim())
            } else {
                format!("[{}] {}", item.priority, item.action.trim())
            };
            push_unique(&mut steps, &step);
        }
    }
    if let Some(idea) = outputs.idea().filter(|idea| is_informative(&idea.suggested_refinement)) {
        push_unique(&mut steps, &idea.suggested_refinement);
    }
    if steps.is_empty() {
        steps.push(RERUN_STEP.to_string());
    }
    steps
}

/// Scores committed stage outputs. Deterministic: the same inputs give the same result.
pub fn score(outputs: &StageOutputs, calmness: Option<&CalmnessResult>) -> DecisionIndexResult {
    let mut fallbacks = Vec::new();
    let sub_scores = sub_scores(outputs, &mut fallbacks);
    let base_score = sub_scores.base();
    let (calm_score, calm_state) = calmness.map_or(
        (DEFAULT_CALM_SCORE, CalmState::Stable),
        |calm| (calm.score, calm.state),
    );
    let score = final_index(base_score, calm_score);
    let grade = Grade::from_score(score);

    let verdict = outputs.strategy().and_then(|strategy| strategy.verdict);
    if outputs.strategy().is_some() && verdict.is_none() {
        fallbacks.push(format!(
            "recommendation: strategy gave no verdict, derived from grade {grade}"
        ));
    }
    let unguarded_recommendation = verdict.unwrap_or_else(|| grade.fallback_recommendation());

    let mut prescriptions = Vec::new();
    let recommendation = if calm_state.is_gating() {
        if let Some(calm) = calmness {
            for question in calm.triggered() {
                prescriptions.push(question.prescription().to_string());
            }
        }
        prescriptions.push(calm_state.cooldown_tip().to_string());
        unguarded_recommendation.downgrade()
    } else {
        unguarded_recommendation
    };

    DecisionIndexResult {
        score,
        base_score,
        calm_score,
        calm_state,
        sub_scores,
        grade,
        recommendation,
        unguarded_recommendation,
        risk_label: outputs
            .strategy()
            .map_or(Level::Medium, |strategy| strategy.overall_risk_level),
        prescriptions,
        key_uncertainties: key_uncertainties(outputs),
        next_steps: next_steps(outputs),
        fallbacks,
    }
}

/// Scores `ctx` and records the result on a new snapshot.
///
/// A context that halted in `FAILED` has no trustworthy outputs to score.
pub fn attach(ctx: &DecisionContext) -> KernelResult<DecisionContext> {
    if let Some(failure) = ctx.failure() {
        return Err(KernelError::Precondition {
            operation: "decision index",
            missing: vec![format!("{} (run failed)", failure.stage)],
        });
    }
    let result = score(ctx.stage_outputs(), ctx.extra().calmness.as_ref());
    Ok(ctx.with_decision_index(result))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_stage_output(
    index: usize,
    entry: &Value,
) -> KernelResult<(StageOutput, Vec<String>)> {
    let structural =
        |reason: String| KernelError::Structural(format!("stage_outputs[{index}]: {reason}"));
    let Some(entry) = entry.as_object() else {
        return Err(structural(format!(
            "expected a {{stage, output}} object, found {}",
            json_kind(entry)
        )));
    };
    let (Some(tag), Some(output)) = (entry.get("stage"), entry.get("output")) else {
        return Err(structural("expected a {stage, output} object".to_string()));
    };
    let stage = tag
        .as_str()
        .and_then(|tag| Stage::ANALYSIS.into_iter().find(|stage| stage.as_str() == tag))
        .ok_or_else(|| structural(format!("unknown stage tag {tag}")))?;
    let (decoded, repaired) = match stage {
        Stage::IdeaValidation => {
            let (idea, repaired) = idea::repair(output);
            (StageOutput::IdeaValidation(idea), repaired)
        }
        Stage::MarketAnalysis => {
            let (market, repaired) = market::repair(output);
            (StageOutput::MarketAnalysis(market), repaired)
        }
        Stage::StrategyAdvice => {
            let (strategy, repaired) = strategy::repair(output);
            (StageOutput::StrategyAdvice(strategy), repaired)
        }
        Stage::Reflection => {
            return Err(structural("reflection is not a stage output".to_string()));
        }
    };
    let notes = repaired
        .into_iter()
        .map(|field| format!("{stage}.{field}: malformed or missing in record, used default"))
        .collect();
    Ok((decoded, notes))
}

/// Rescores a persisted run record (the serialized context) without loading it fully.
///
/// Only the container shape is strict: `stage_outputs` must be an array of `{stage, output}`
/// entries with known stage tags in commit order. Bad field values inside an output take the
/// field default and are listed in `fallbacks`.
pub fn score_record(record: &Value) -> KernelResult<DecisionIndexResult> {
    let Some(record) = record.as_object() else {
        return Err(KernelError::Structural(format!(
            "run record must be an object, found {}",
            json_kind(record)
        )));
    };
    if let Some(failure) = record.get("failure").filter(|f| !f.is_null()) {
        let stage = failure
            .get("stage")
            .and_then(Value::as_str)
            .unwrap_or("unknown stage");
        return Err(KernelError::Precondition {
            operation: "decision index",
            missing: vec![format!("{stage} (run failed)")],
        });
    }
    let entries: &[Value] = match record.get("stage_outputs") {
        None | Some(Value::Null) => &[],
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(KernelError::Structural(format!(
                "stage_outputs must be an array, found {}",
                json_kind(other)
            )));
        }
    };
    let mut outputs = StageOutputs::default();
    let mut repair_notes = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let (output, notes) = decode_stage_output(index, entry)?;
        outputs = outputs
            .append(output)
            .map_err(|err| KernelError::Structural(format!("stage_outputs[{index}]: {err}")))?;
        repair_notes.extend(notes);
    }
    let calmness = match record.get("extra").and_then(|extra| extra.get("calmness")) {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            serde_json::from_value::<CalmnessResult>(value.clone())
                .map_err(|err| KernelError::Structural(format!("calmness: {err}")))?,
        ),
    };
    let mut result = score(&outputs, calmness.as_ref());
    result.fallbacks.extend(repair_notes);
    Ok(result)
}

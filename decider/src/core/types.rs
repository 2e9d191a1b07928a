//! Typed stage outputs and the small enumerations they share.
//!
//! Field names and enum spellings match the JSON Schemas under `decider/schemas/`, so a
//! schema-valid value deserializes straight into these types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Text used wherever a stage could not supply a meaningful string.
pub const NEUTRAL_TEXT: &str = "insufficient information";

/// Mid-range idea clarity used when the stage did not supply a usable score.
pub const NEUTRAL_CLARITY: u8 = 5;

/// The four ordered analysis steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IdeaValidation,
    MarketAnalysis,
    StrategyAdvice,
    Reflection,
}

impl Stage {
    /// Stages whose outputs land in `stage_outputs`, in commit order.
    pub const ANALYSIS: [Stage; 3] = [
        Stage::IdeaValidation,
        Stage::MarketAnalysis,
        Stage::StrategyAdvice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::IdeaValidation => "idea_validation",
            Stage::MarketAnalysis => "market_analysis",
            Stage::StrategyAdvice => "strategy_advice",
            Stage::Reflection => "reflection",
        }
    }

    /// Human-readable title used in reports.
    pub fn title(self) -> &'static str {
        match self {
            Stage::IdeaValidation => "Idea Validation",
            Stage::MarketAnalysis => "Market Analysis",
            Stage::StrategyAdvice => "Strategy Advice",
            Stage::Reflection => "Reflection",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which backend actually produced a stage's raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderLabel {
    Offline,
    Remote,
}

impl ProviderLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderLabel::Offline => "offline",
            ProviderLabel::Remote => "remote",
        }
    }
}

/// Three-step scale shared by risk, competition, confidence and priority fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::Medium => "medium",
            Level::High => "high",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Flat,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    Reversible,
    PartiallyReversible,
    Irreversible,
}

/// Recommendation labels on the fixed severity scale, mildest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Go,
    Cautious,
    Delay,
    DoNot,
}

impl Recommendation {
    /// Severity ladder used by the calmness guardrail.
    pub const SCALE: [Recommendation; 4] = [
        Recommendation::Go,
        Recommendation::Cautious,
        Recommendation::Delay,
        Recommendation::DoNot,
    ];

    /// One step more severe; `DoNot` saturates.
    pub fn downgrade(self) -> Self {
        let idx = Self::SCALE
            .iter()
            .position(|r| *r == self)
            .unwrap_or(Self::SCALE.len() - 1);
        Self::SCALE[(idx + 1).min(Self::SCALE.len() - 1)]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Go => "go",
            Recommendation::Cautious => "cautious",
            Recommendation::Delay => "delay",
            Recommendation::DoNot => "do_not",
        }
    }

    /// Label shown to people ("do" / "do cautiously" / "delay" / "do not").
    pub fn label(self) -> &'static str {
        match self {
            Recommendation::Go => "do",
            Recommendation::Cautious => "do cautiously",
            Recommendation::Delay => "delay",
            Recommendation::DoNot => "do not",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaValidation {
    pub valid: bool,
    pub clarity_score: u8,
    pub summary: String,
    pub assumptions: Vec<String>,
    pub missing_info: Vec<String>,
    pub suggested_refinement: String,
}

impl Default for IdeaValidation {
    fn default() -> Self {
        Self {
            valid: true,
            clarity_score: NEUTRAL_CLARITY,
            summary: NEUTRAL_TEXT.to_string(),
            assumptions: Vec::new(),
            missing_info: Vec::new(),
            suggested_refinement: NEUTRAL_TEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketAnalysis {
    pub market_size: MarketSize,
    pub trend: Trend,
    pub competition_level: Level,
    pub key_competitors: Vec<String>,
    pub opportunity_summary: String,
    pub risks: Vec<String>,
}

impl Default for MarketAnalysis {
    fn default() -> Self {
        Self {
            market_size: MarketSize::Medium,
            trend: Trend::Flat,
            competition_level: Level::Medium,
            key_competitors: Vec::new(),
            opportunity_summary: NEUTRAL_TEXT.to_string(),
            risks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub level: Level,
    pub mitigation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub phase: String,
    pub duration: String,
    pub deliverable: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionItem {
    pub priority: Level,
    pub action: String,
    pub timeline: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyAdvice {
    /// `None` when the stage declined to give a verdict; the scorer then falls back to the grade.
    pub verdict: Option<Recommendation>,
    pub confidence: Level,
    pub reasons: Vec<String>,
    pub overall_risk_level: Level,
    pub risk_factors: Vec<RiskFactor>,
    pub max_loss_estimate: String,
    pub reversibility: Reversibility,
    pub time_estimate: String,
    pub budget_estimate: String,
    pub key_milestones: Vec<Milestone>,
    pub critical_resources: Vec<String>,
    pub gaps: Vec<String>,
    pub action_items: Vec<ActionItem>,
    pub alternatives: Vec<String>,
    pub one_liner: String,
}

impl Default for StrategyAdvice {
    fn default() -> Self {
        Self {
            verdict: None,
            confidence: Level::Medium,
            reasons: Vec::new(),
            overall_risk_level: Level::Medium,
            risk_factors: Vec::new(),
            max_loss_estimate: NEUTRAL_TEXT.to_string(),
            reversibility: Reversibility::PartiallyReversible,
            time_estimate: NEUTRAL_TEXT.to_string(),
            budget_estimate: NEUTRAL_TEXT.to_string(),
            key_milestones: Vec::new(),
            critical_resources: Vec::new(),
            gaps: Vec::new(),
            action_items: Vec::new(),
            alternatives: Vec::new(),
            one_liner: NEUTRAL_TEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reflection {
    pub consistency_check: bool,
    pub conflicts: Vec<String>,
    pub summary: String,
    pub suggested_actions: Vec<String>,
    pub confidence_in_outputs: Level,
}

impl Default for Reflection {
    fn default() -> Self {
        Self {
            consistency_check: true,
            conflicts: Vec::new(),
            summary: NEUTRAL_TEXT.to_string(),
            suggested_actions: Vec::new(),
            confidence_in_outputs: Level::Medium,
        }
    }
}

/// One committed analysis-stage output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    IdeaValidation(IdeaValidation),
    MarketAnalysis(MarketAnalysis),
    StrategyAdvice(StrategyAdvice),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::IdeaValidation(_) => Stage::IdeaValidation,
            StageOutput::MarketAnalysis(_) => Stage::MarketAnalysis,
            StageOutput::StrategyAdvice(_) => Stage::StrategyAdvice,
        }
    }
}

/// True when `text` carries real content rather than blank or placeholder text.
pub fn is_informative(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed != NEUTRAL_TEXT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_walks_the_scale_and_saturates() {
        assert_eq!(Recommendation::Go.downgrade(), Recommendation::Cautious);
        assert_eq!(Recommendation::Cautious.downgrade(), Recommendation::Delay);
        assert_eq!(Recommendation::Delay.downgrade(), Recommendation::DoNot);
        assert_eq!(Recommendation::DoNot.downgrade(), Recommendation::DoNot);
    }

    /// Verifies stage outputs use the adjacently tagged layout stored in run records.
    #[test]
    fn stage_output_serializes_with_stage_tag() {
        let output = StageOutput::MarketAnalysis(MarketAnalysis::default());
        let value = serde_json::to_value(&output).expect("serialize");
        assert_eq!(value["stage"], "market_analysis");
        assert_eq!(value["output"]["trend"], "flat");
    }

    #[test]
    fn missing_fields_deserialize_to_neutral_defaults() {
        let idea: IdeaValidation =
            serde_json::from_str(r#"{"valid": false}"#).expect("deserialize");
        assert!(!idea.valid);
        assert_eq!(idea.clarity_score, NEUTRAL_CLARITY);
        assert_eq!(idea.summary, NEUTRAL_TEXT);
    }

    #[test]
    fn placeholder_text_is_not_informative() {
        assert!(!is_informative(NEUTRAL_TEXT));
        assert!(!is_informative("   "));
        assert!(is_informative("3 months"));
    }
}

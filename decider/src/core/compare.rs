//! Side-by-side comparison of the three variant decision indexes.

use serde::{Deserialize, Serialize};

use crate::core::decision_index::{DecisionIndexResult, Grade, NO_CLEAR_UNCERTAINTY};
use crate::core::types::{Level, Recommendation};
use crate::core::variants::VariantKind;

const RISK_ADJUST: [(Level, i16); 3] = [(Level::Low, 3), (Level::Medium, 0), (Level::High, -8)];

/// Minimum adjusted-score spread (inclusive) for each confidence level, highest first.
const CONFIDENCE_BANDS: [(i16, f64); 4] = [(20, 0.85), (10, 0.65), (5, 0.45), (0, 0.25)];

const MAX_REASONS: usize = 3;
const MAX_UNCERTAINTIES: usize = 3;
const CLOSE_SPREAD: i16 = 10;

/// Per-variant tag shown next to each variant in the comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAssessment {
    pub kind: VariantKind,
    pub score: u8,
    pub adjusted_score: i16,
    pub grade: Grade,
    pub recommendation: Recommendation,
    pub risk_label: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantComparison {
    /// Assessments in variant order (conservative, current, aggressive).
    pub assessments: Vec<VariantAssessment>,
    pub recommended: VariantKind,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub key_uncertainties: Vec<String>,
}

fn adjusted(result: &DecisionIndexResult) -> i16 {
    let risk = RISK_ADJUST
        .iter()
        .find(|(level, _)| *level == result.risk_label)
        .map_or(0, |(_, delta)| *delta);
    i16::from(result.score) + risk
}

fn confidence(spread: i16) -> f64 {
    CONFIDENCE_BANDS
        .iter()
        .find(|(floor, _)| spread >= *floor)
        .map_or(0.25, |(_, confidence)| *confidence)
}

/// Picks the variant with the highest risk-adjusted score.
///
/// Input order does not matter; ties go to the earlier variant in
/// conservative, current, aggressive order. Returns `None` for an empty slice.
pub fn compare(results: &[(VariantKind, &DecisionIndexResult)]) -> Option<VariantComparison> {
    let mut ordered: Vec<(VariantKind, &DecisionIndexResult)> = results.to_vec();
    ordered.sort_by_key(|(kind, _)| *kind);

    let assessments: Vec<VariantAssessment> = ordered
        .iter()
        .map(|(kind, result)| VariantAssessment {
            kind: *kind,
            score: result.score,
            adjusted_score: adjusted(result),
            grade: result.grade,
            recommendation: result.recommendation,
            risk_label: result.risk_label,
        })
        .collect();

    let mut ranked: Vec<&VariantAssessment> = assessments.iter().collect();
    ranked.sort_by(|a, b| b.adjusted_score.cmp(&a.adjusted_score).then(a.kind.cmp(&b.kind)));
    let best = *ranked.first()?;
    let worst = ranked.last().map_or(best.adjusted_score, |w| w.adjusted_score);
    let spread = best.adjusted_score - worst;

    let mut reasons = vec![format!(
        "{} has the highest composite score ({}/100, grade {})",
        best.kind, best.score, best.grade
    )];
    if best.risk_label == Level::High {
        reasons.push("its risk is high, but the composite score still leads".to_string());
    } else {
        reasons.push(format!(
            "its risk level ({}) is within a controllable range",
            best.risk_label
        ));
    }
    if let Some(second) = ranked.get(1) {
        let gap = best.adjusted_score - second.adjusted_score;
        if gap > 0 {
            reasons.push(format!("it leads {} by {gap} points", second.kind));
        } else {
            reasons.push(format!(
                "{} scores the same; weigh personal preference",
                second.kind
            ));
        }
    }
    reasons.truncate(MAX_REASONS);

    let mut key_uncertainties = Vec::new();
    if spread < CLOSE_SPREAD {
        key_uncertainties.push(
            "the variants score closely; treat the recommendation as low-confidence".to_string(),
        );
    }
    for (kind, result) in &ordered {
        if let Some(first) = result
            .key_uncertainties
            .first()
            .filter(|item| item.as_str() != NO_CLEAR_UNCERTAINTY)
        {
            let item = format!("[{kind}] {first}");
            if !key_uncertainties.contains(&item) {
                key_uncertainties.push(item);
            }
        }
    }
    if key_uncertainties.is_empty() {
        key_uncertainties
            .push("every variant still needs market validation; test in small steps".to_string());
    }
    key_uncertainties.truncate(MAX_UNCERTAINTIES);

    let recommended = best.kind;
    Some(VariantComparison {
        assessments,
        recommended,
        confidence: confidence(spread),
        reasons,
        key_uncertainties,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::StageOutputs;
    use crate::core::decision_index::score;

    fn result(score_value: u8, risk: Level) -> DecisionIndexResult {
        let mut result = score(&StageOutputs::default(), None);
        result.score = score_value;
        result.risk_label = risk;
        result.key_uncertainties.clear();
        result
    }

    #[test]
    fn highest_adjusted_score_wins() {
        let conservative = result(60, Level::Low);
        let current = result(70, Level::Medium);
        let aggressive = result(75, Level::High);
        let cmp = compare(&[
            (VariantKind::Aggressive, &aggressive),
            (VariantKind::Current, &current),
            (VariantKind::Conservative, &conservative),
        ])
        .expect("compare");
        // aggressive 75 - 8 = 67, current 70, conservative 63
        assert_eq!(cmp.recommended, VariantKind::Current);
        assert_eq!(cmp.assessments[0].kind, VariantKind::Conservative);
        assert_eq!(cmp.confidence, 0.45);
        assert!(cmp.reasons[0].starts_with("current has the highest"));
    }

    /// Verifies ties resolve in variant order and the result ignores input order.
    #[test]
    fn ties_prefer_conservative_and_input_order_is_irrelevant() {
        let a = result(50, Level::Medium);
        let b = result(50, Level::Medium);
        let c = result(50, Level::Medium);
        let forward = compare(&[
            (VariantKind::Conservative, &a),
            (VariantKind::Current, &b),
            (VariantKind::Aggressive, &c),
        ])
        .expect("compare");
        let backward = compare(&[
            (VariantKind::Aggressive, &c),
            (VariantKind::Current, &b),
            (VariantKind::Conservative, &a),
        ])
        .expect("compare");
        assert_eq!(forward, backward);
        assert_eq!(forward.recommended, VariantKind::Conservative);
        assert_eq!(forward.confidence, 0.25);
        assert!(forward.key_uncertainties[0].contains("score closely"));
    }

    #[test]
    fn wide_spread_gives_high_confidence() {
        let low = result(30, Level::High);
        let high = result(80, Level::Low);
        let cmp = compare(&[
            (VariantKind::Conservative, &high),
            (VariantKind::Aggressive, &low),
        ])
        .expect("compare");
        assert_eq!(cmp.recommended, VariantKind::Conservative);
        assert_eq!(cmp.confidence, 0.85);
    }

    #[test]
    fn empty_input_has_no_comparison() {
        assert!(compare(&[]).is_none());
    }
}

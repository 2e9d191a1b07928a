//! Deterministic cross-stage consistency rules applied during reflection.

use crate::core::context::ReflectionInputs;
use crate::core::types::{Level, MarketSize, Recommendation, Trend};

const HIGH_CLARITY: u8 = 8;
const MANY_GAPS: usize = 2;

type Rule = fn(&ReflectionInputs<'_>) -> Option<&'static str>;

fn says_go(inputs: &ReflectionInputs<'_>) -> bool {
    inputs.strategy.verdict == Some(Recommendation::Go)
}

const RULES: [Rule; 5] = [
    |inputs| {
        (!inputs.idea.valid && says_go(inputs))
            .then_some("idea validation rejected the idea, yet strategy says go")
    },
    |inputs| {
        (inputs.market.market_size == MarketSize::Small
            && inputs.strategy.overall_risk_level == Level::High
            && says_go(inputs))
        .then_some("the market is small and risk is high, yet strategy says go")
    },
    |inputs| {
        (inputs.market.trend == Trend::Declining
            && inputs.idea.clarity_score >= HIGH_CLARITY
            && says_go(inputs))
        .then_some("a clear idea in a declining market still gets a go; check the market timing")
    },
    |inputs| {
        (inputs.market.competition_level == Level::High
            && inputs.strategy.overall_risk_level == Level::Low)
            .then_some("competition is high but overall risk is rated low")
    },
    |inputs| {
        (says_go(inputs) && inputs.strategy.gaps.len() > MANY_GAPS)
            .then_some("strategy says go despite more than two resource gaps")
    },
];

/// Conflicts flagged by the fixed rule set, in rule order.
pub fn find_conflicts(inputs: &ReflectionInputs<'_>) -> Vec<String> {
    RULES
        .iter()
        .filter_map(|rule| rule(inputs))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IdeaValidation, MarketAnalysis, StrategyAdvice};

    #[test]
    fn neutral_outputs_have_no_conflicts() {
        let idea = IdeaValidation::default();
        let market = MarketAnalysis::default();
        let strategy = StrategyAdvice::default();
        let inputs = ReflectionInputs {
            idea: &idea,
            market: &market,
            strategy: &strategy,
        };
        assert!(find_conflicts(&inputs).is_empty());
    }

    #[test]
    fn go_on_invalid_idea_is_flagged() {
        let idea = IdeaValidation {
            valid: false,
            ..IdeaValidation::default()
        };
        let market = MarketAnalysis::default();
        let strategy = StrategyAdvice {
            verdict: Some(Recommendation::Go),
            gaps: vec!["a".into(), "b".into(), "c".into()],
            ..StrategyAdvice::default()
        };
        let conflicts = find_conflicts(&ReflectionInputs {
            idea: &idea,
            market: &market,
            strategy: &strategy,
        });
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts[0].contains("rejected the idea"));
        assert!(conflicts[1].contains("resource gaps"));
    }

    #[test]
    fn high_competition_with_low_risk_is_flagged() {
        let idea = IdeaValidation::default();
        let market = MarketAnalysis {
            competition_level: Level::High,
            ..MarketAnalysis::default()
        };
        let strategy = StrategyAdvice {
            overall_risk_level: Level::Low,
            ..StrategyAdvice::default()
        };
        let conflicts = find_conflicts(&ReflectionInputs {
            idea: &idea,
            market: &market,
            strategy: &strategy,
        });
        assert_eq!(conflicts, vec!["competition is high but overall risk is rated low"]);
    }
}

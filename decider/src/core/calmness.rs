//! Calmness guardrail: a fixed four-question self-check scored by lookup tables.
//!
//! Each answer is on a three-point scale (`0` never / has a plan, `1` sometimes / vague,
//! `2` often / none). A question's sub-score is its maximum minus the penalty for the answer;
//! the composite is the sum of the four sub-scores, so the maxima add up to 100.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::context::DecisionContext;
use crate::core::error::{KernelError, KernelResult};

/// Largest valid answer on the three-point scale.
pub const ANSWER_MAX: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalmQuestion {
    /// "How often have you changed direction in the last month?"
    DirectionChange,
    /// "Are you about to decide on impulse?"
    Impulse,
    /// "Do you consume more content than you act on?"
    ConsumptionOverAction,
    /// "Do you have a stop-loss plan?" (answer is the inverse of having one)
    StopLoss,
}

/// Penalty per answer (index = answer). Index 0 is always 0 so the maximum is the last column.
const PENALTIES: [(CalmQuestion, [u8; 3]); 4] = [
    (CalmQuestion::DirectionChange, [0, 12, 28]),
    (CalmQuestion::Impulse, [0, 14, 30]),
    (CalmQuestion::ConsumptionOverAction, [0, 10, 22]),
    (CalmQuestion::StopLoss, [0, 10, 20]),
];

const PRESCRIPTIONS: [(CalmQuestion, &str); 4] = [
    (
        CalmQuestion::DirectionChange,
        "Commit to one direction for the next 30 days and only revisit it at a scheduled review.",
    ),
    (
        CalmQuestion::Impulse,
        "Wait 72 hours before committing money or resigning, then re-read this analysis.",
    ),
    (
        CalmQuestion::ConsumptionOverAction,
        "Swap one hour of research or content per day for one concrete validation action.",
    ),
    (
        CalmQuestion::StopLoss,
        "Write down a stop-loss before starting: the most money and months you will spend before stopping.",
    ),
];

/// Lower bound (inclusive) of each state, highest first.
const STATE_BANDS: [(u8, CalmState); 3] = [
    (70, CalmState::Stable),
    (40, CalmState::Elevated),
    (0, CalmState::Critical),
];

impl CalmQuestion {
    pub const ALL: [CalmQuestion; 4] = [
        CalmQuestion::DirectionChange,
        CalmQuestion::Impulse,
        CalmQuestion::ConsumptionOverAction,
        CalmQuestion::StopLoss,
    ];

    fn penalties(self) -> [u8; 3] {
        PENALTIES
            .iter()
            .find(|(question, _)| *question == self)
            .map_or([0; 3], |(_, penalties)| *penalties)
    }

    /// Sub-score ceiling for this question.
    pub fn max_score(self) -> u8 {
        self.penalties()[usize::from(ANSWER_MAX)]
    }

    pub fn prescription(self) -> &'static str {
        PRESCRIPTIONS
            .iter()
            .find(|(question, _)| *question == self)
            .map_or("", |(_, text)| text)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalmQuestion::DirectionChange => "direction_change",
            CalmQuestion::Impulse => "impulse",
            CalmQuestion::ConsumptionOverAction => "consumption_over_action",
            CalmQuestion::StopLoss => "stop_loss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalmState {
    Stable,
    Elevated,
    Critical,
}

impl CalmState {
    pub fn from_score(score: u8) -> Self {
        STATE_BANDS
            .iter()
            .find(|(floor, _)| score >= *floor)
            .map_or(CalmState::Critical, |(_, state)| *state)
    }

    /// Elevated and critical states downgrade recommendations.
    pub fn is_gating(self) -> bool {
        self != CalmState::Stable
    }

    pub fn cooldown_tip(self) -> &'static str {
        match self {
            CalmState::Stable => "Your state is calm; it is a reasonable time for key decisions.",
            CalmState::Elevated => {
                "Run a 7-day cooldown plan first to lower the risk of an impulsive decision."
            }
            CalmState::Critical => {
                "Not a good time for a major decision; rest first and follow a 7-day cooldown plan."
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalmState::Stable => "stable",
            CalmState::Elevated => "elevated",
            CalmState::Critical => "critical",
        }
    }
}

impl fmt::Display for CalmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw answers in question order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalmnessAnswers {
    pub direction_change: u8,
    pub impulse: u8,
    pub consumption_over_action: u8,
    pub stop_loss: u8,
}

impl CalmnessAnswers {
    pub fn new(direction_change: u8, impulse: u8, consumption_over_action: u8, stop_loss: u8) -> Self {
        Self {
            direction_change,
            impulse,
            consumption_over_action,
            stop_loss,
        }
    }

    pub fn get(&self, question: CalmQuestion) -> u8 {
        match question {
            CalmQuestion::DirectionChange => self.direction_change,
            CalmQuestion::Impulse => self.impulse,
            CalmQuestion::ConsumptionOverAction => self.consumption_over_action,
            CalmQuestion::StopLoss => self.stop_loss,
        }
    }

    pub fn validate(&self) -> KernelResult<()> {
        let out_of_domain: Vec<String> = CalmQuestion::ALL
            .iter()
            .filter(|question| self.get(**question) > ANSWER_MAX)
            .map(|question| format!("{}={}", question.as_str(), self.get(*question)))
            .collect();
        if out_of_domain.is_empty() {
            return Ok(());
        }
        Err(KernelError::Validation(format!(
            "calmness answers must be 0..={ANSWER_MAX}: {}",
            out_of_domain.join(", ")
        )))
    }
}

/// Parses `"d,i,c,s"`, e.g. `"0,1,2,0"`. Domain checks happen in [`evaluate`].
impl FromStr for CalmnessAnswers {
    type Err = KernelError;

    fn from_str(raw: &str) -> KernelResult<Self> {
        let values = raw
            .split(',')
            .map(|part| {
                part.trim().parse::<u8>().map_err(|_| {
                    KernelError::Validation(format!("calmness answer `{}` is not an integer", part.trim()))
                })
            })
            .collect::<KernelResult<Vec<u8>>>()?;
        match values.as_slice() {
            [d, i, c, s] => Ok(Self::new(*d, *i, *c, *s)),
            _ => Err(KernelError::Validation(format!(
                "expected 4 calmness answers, got {}",
                values.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question: CalmQuestion,
    pub answer: u8,
    pub score: u8,
    pub max: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalmnessResult {
    pub answers: CalmnessAnswers,
    pub sub_scores: Vec<QuestionScore>,
    pub score: u8,
    pub state: CalmState,
    pub cooldown_tip: String,
}

impl CalmnessResult {
    /// Questions answered with anything other than the calm option.
    pub fn triggered(&self) -> impl Iterator<Item = CalmQuestion> + '_ {
        self.sub_scores
            .iter()
            .filter(|sub| sub.answer > 0)
            .map(|sub| sub.question)
    }
}

/// Scores four answers. Out-of-domain answers are rejected, never clamped.
pub fn evaluate(answers: CalmnessAnswers) -> KernelResult<CalmnessResult> {
    answers.validate()?;
    let sub_scores: Vec<QuestionScore> = CalmQuestion::ALL
        .iter()
        .map(|question| {
            let answer = answers.get(*question);
            let penalty = question.penalties()[usize::from(answer)];
            QuestionScore {
                question: *question,
                answer,
                score: question.max_score() - penalty,
                max: question.max_score(),
            }
        })
        .collect();
    let total: u32 = sub_scores.iter().map(|sub| u32::from(sub.score)).sum();
    let score = u8::try_from(total.min(100)).unwrap_or(100);
    let state = CalmState::from_score(score);
    Ok(CalmnessResult {
        answers,
        sub_scores,
        score,
        state,
        cooldown_tip: state.cooldown_tip().to_string(),
    })
}

/// Evaluates `answers` and records the result on a new snapshot of `ctx`.
pub fn attach(ctx: &DecisionContext, answers: CalmnessAnswers) -> KernelResult<DecisionContext> {
    Ok(ctx.with_calmness(evaluate(answers)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maxima_sum_to_one_hundred() {
        let total: u32 = CalmQuestion::ALL
            .iter()
            .map(|q| u32::from(q.max_score()))
            .sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn all_calm_answers_score_full_marks() {
        let result = evaluate(CalmnessAnswers::default()).expect("evaluate");
        assert_eq!(result.score, 100);
        assert_eq!(result.state, CalmState::Stable);
        assert_eq!(result.triggered().count(), 0);
    }

    #[test]
    fn worst_answers_score_zero_and_critical() {
        let result = evaluate(CalmnessAnswers::new(2, 2, 2, 2)).expect("evaluate");
        assert_eq!(result.score, 0);
        assert_eq!(result.state, CalmState::Critical);
    }

    #[test]
    fn middling_answers_are_elevated() {
        let result = evaluate(CalmnessAnswers::new(1, 1, 1, 1)).expect("evaluate");
        assert_eq!(result.score, 100 - 12 - 14 - 10 - 10);
        assert_eq!(result.state, CalmState::Elevated);
    }

    /// Verifies every valid answer combination yields a bounded score and the matching state.
    #[test]
    fn every_valid_combination_is_bounded() {
        for d in 0..=ANSWER_MAX {
            for i in 0..=ANSWER_MAX {
                for c in 0..=ANSWER_MAX {
                    for s in 0..=ANSWER_MAX {
                        let result = evaluate(CalmnessAnswers::new(d, i, c, s)).expect("evaluate");
                        assert!(result.score <= 100);
                        assert_eq!(result.state, CalmState::from_score(result.score));
                    }
                }
            }
        }
    }

    #[test]
    fn out_of_domain_answer_fails_validation() {
        let err = evaluate(CalmnessAnswers::new(0, 3, 0, 0)).unwrap_err();
        match err {
            KernelError::Validation(message) => assert!(message.contains("impulse=3")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn state_thresholds_are_inclusive_lower_bounds() {
        assert_eq!(CalmState::from_score(39), CalmState::Critical);
        assert_eq!(CalmState::from_score(40), CalmState::Elevated);
        assert_eq!(CalmState::from_score(69), CalmState::Elevated);
        assert_eq!(CalmState::from_score(70), CalmState::Stable);
    }

    #[test]
    fn parses_comma_separated_answers() {
        let answers: CalmnessAnswers = "0, 1,2,0".parse().expect("parse");
        assert_eq!(answers, CalmnessAnswers::new(0, 1, 2, 0));
        assert!("0,1,2".parse::<CalmnessAnswers>().is_err());
        assert!("0,x,2,0".parse::<CalmnessAnswers>().is_err());
    }

    #[test]
    fn every_question_has_a_prescription() {
        for question in CalmQuestion::ALL {
            assert!(!question.prescription().is_empty(), "{}", question.as_str());
        }
    }
}

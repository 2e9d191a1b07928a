//! Test-only backends and sample decision data.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

use crate::core::context::{DecisionContext, DecisionInput, RunMeta, StageProvenance};
use crate::core::types::{
    ActionItem, IdeaValidation, Level, MarketAnalysis, MarketSize, ProviderLabel, Recommendation,
    Reversibility, Stage, StageOutput, StrategyAdvice, Trend,
};
use crate::core::variants::ScenarioPlan;
use crate::io::backend::{Backend, BackendError, GenerateRequest, Generation};

/// Replays a fixed list of replies in order and records which stage asked for each.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Value, BackendError>>>,
    calls: Mutex<Vec<Stage>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<Value, BackendError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stages that called `generate`, in call order.
    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

impl Backend for ScriptedBackend {
    fn label(&self) -> ProviderLabel {
        ProviderLabel::Remote
    }

    fn generate(&self, request: &GenerateRequest<'_>) -> Result<Generation, BackendError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.stage);
        }
        let next = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Err(BackendError::MalformedReply("script exhausted".to_string())));
        next.map(|value| Generation {
            value,
            provider: ProviderLabel::Remote,
            fallback_reason: None,
        })
    }
}

/// Fails every call with a transport error, as an unreachable remote would.
#[derive(Debug, Default)]
pub struct FailingBackend {
    calls: AtomicUsize,
}

impl FailingBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Backend for FailingBackend {
    fn label(&self) -> ProviderLabel {
        ProviderLabel::Remote
    }

    fn generate(&self, _request: &GenerateRequest<'_>) -> Result<Generation, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendError::Transport("connection refused".to_string()))
    }
}

/// A fully described decision with no plan.
pub fn sample_input() -> DecisionInput {
    DecisionInput {
        current_state: "Salaried backend engineer, six years of experience".to_string(),
        resources: "Savings covering 12 months of expenses".to_string(),
        constraints: vec!["Must keep health insurance".to_string()],
        ..DecisionInput::new("Quit my job to build an indie developer tool")
    }
}

pub fn sample_plan() -> ScenarioPlan {
    ScenarioPlan {
        time_horizon_months: 6.0,
        monthly_budget: 2000.0,
        validation_window_weeks: 4.0,
        outputs_per_week: 3.0,
        max_loss: 12_000.0,
        success_bar: 10.0,
        constraint_tolerance_pct: 10.0,
    }
}

pub fn sample_idea() -> IdeaValidation {
    IdeaValidation {
        valid: true,
        clarity_score: 8,
        summary: "Build a paid developer tool after leaving a salaried job".to_string(),
        assumptions: vec!["Developers will pay for the tool".to_string()],
        missing_info: vec!["Pricing".to_string()],
        suggested_refinement: "Interview ten potential customers before quitting".to_string(),
    }
}

pub fn sample_market() -> MarketAnalysis {
    MarketAnalysis {
        market_size: MarketSize::Medium,
        trend: Trend::Rising,
        competition_level: Level::Medium,
        key_competitors: vec!["Existing open source tools".to_string()],
        opportunity_summary: "Teams are paying for focused tooling".to_string(),
        risks: vec!["Free alternatives".to_string()],
    }
}

pub fn sample_strategy() -> StrategyAdvice {
    StrategyAdvice {
        verdict: Some(Recommendation::Cautious),
        confidence: Level::Medium,
        reasons: vec!["Savings buffer exists".to_string()],
        overall_risk_level: Level::Medium,
        reversibility: Reversibility::PartiallyReversible,
        critical_resources: vec!["Savings".to_string()],
        action_items: vec![ActionItem {
            priority: Level::High,
            action: "Ship a paid beta".to_string(),
            timeline: "8 weeks".to_string(),
        }],
        ..StrategyAdvice::default()
    }
}

fn provenance(stage: Stage) -> StageProvenance {
    StageProvenance {
        stage,
        provider: ProviderLabel::Offline,
        fallback_reason: None,
        repaired_fields: Vec::new(),
    }
}

/// A fresh context over [`sample_input`] with the first `committed` analysis stages filled in.
pub fn context_with_stages(committed: usize) -> DecisionContext {
    let outputs = [
        StageOutput::IdeaValidation(sample_idea()),
        StageOutput::MarketAnalysis(sample_market()),
        StageOutput::StrategyAdvice(sample_strategy()),
    ];
    let mut ctx = DecisionContext::new(
        sample_input(),
        RunMeta::new("20261016T153010-1a2b3c4d", "2026-10-16T15:30:10Z"),
    )
    .expect("sample context");
    for output in outputs.into_iter().take(committed) {
        let stage = output.stage();
        ctx = ctx.with_stage(output, provenance(stage)).expect("sample stage");
    }
    ctx
}

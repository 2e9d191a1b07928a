//! End-to-end pipeline runs against offline, fallback, failing and scripted backends.

use std::net::TcpListener;

use serde_json::json;

use decider::core::calmness::{CalmState, CalmnessAnswers};
use decider::core::decision_index::{self, score_record};
use decider::core::error::KernelError;
use decider::core::types::{ProviderLabel, Stage};
use decider::io::backend::{
    Backend, FallbackBackend, OfflineBackend, RemoteBackend, select_backend_with_key,
};
use decider::io::config::{DeciderConfig, Provider, RemoteConfig};
use decider::pipeline::{DecisionRequest, Pipeline, PipelineState, run_decision};
use decider::test_support::{FailingBackend, ScriptedBackend, context_with_stages, sample_input};

const BUDGET: usize = 16_000;

#[test]
fn offline_run_completes_and_is_scored() {
    let outcome =
        run_decision(&OfflineBackend, BUDGET, DecisionRequest::new(sample_input())).expect("run");

    assert_eq!(outcome.state, PipelineState::Done);
    let ctx = &outcome.context;
    assert!(ctx.is_complete());
    assert_eq!(
        ctx.stage_outputs().stages(),
        vec![Stage::IdeaValidation, Stage::MarketAnalysis, Stage::StrategyAdvice]
    );
    assert!(ctx.meta().provenance.iter().all(|p| p.provider == ProviderLabel::Offline
        && p.fallback_reason.is_none()));

    let index = ctx.extra().decision_index.as_ref().expect("index");
    assert_eq!(index.calm_score, 100);
    assert_eq!(index.calm_state, CalmState::Stable);
    assert_eq!(index.recommendation, index.unguarded_recommendation);
}

/// Verifies a remote provider without a credential runs fully offline.
#[test]
fn remote_without_credential_selects_offline() {
    let cfg = DeciderConfig {
        provider: Provider::Remote,
        ..DeciderConfig::default()
    };
    let backend = select_backend_with_key(&cfg, None).expect("backend");
    assert_eq!(backend.label(), ProviderLabel::Offline);

    let outcome =
        run_decision(backend.as_ref(), BUDGET, DecisionRequest::new(sample_input())).expect("run");
    assert!(outcome.is_done());
    assert!(outcome
        .context
        .meta()
        .provenance
        .iter()
        .all(|p| p.provider == ProviderLabel::Offline));
}

/// Verifies every failed primary call is answered by the offline backend with a reason.
#[test]
fn fallback_absorbs_primary_failures() {
    let backend = FallbackBackend::new(FailingBackend::default());
    let outcome =
        run_decision(&backend, BUDGET, DecisionRequest::new(sample_input())).expect("run");

    assert!(outcome.is_done());
    let provenance = &outcome.context.meta().provenance;
    assert_eq!(provenance.len(), 4);
    for entry in provenance {
        assert_eq!(entry.provider, ProviderLabel::Offline);
        let reason = entry.fallback_reason.as_deref().expect("fallback reason");
        assert!(reason.contains("connection refused"), "{reason}");
    }
}

#[test]
fn unreachable_remote_falls_back_per_stage() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let remote = RemoteBackend::new(
        &RemoteConfig {
            endpoint: format!("http://127.0.0.1:{port}/v1"),
            timeout_secs: 5,
            ..RemoteConfig::default()
        },
        "test-key".to_string(),
    )
    .expect("remote backend");
    let backend = FallbackBackend::new(remote);

    let outcome =
        run_decision(&backend, BUDGET, DecisionRequest::new(sample_input())).expect("run");
    assert!(outcome.is_done());
    assert!(outcome
        .context
        .meta()
        .provenance
        .iter()
        .all(|p| p.fallback_reason.is_some()));
}

/// Verifies an unwrapped backend error halts the run with an explicit failure marker.
#[test]
fn raw_backend_error_halts_in_failed() {
    let backend = FailingBackend::default();
    let outcome =
        run_decision(&backend, BUDGET, DecisionRequest::new(sample_input())).expect("run");

    assert_eq!(outcome.state, PipelineState::Failed);
    assert_eq!(backend.calls(), 1);
    let ctx = &outcome.context;
    assert_eq!(ctx.failure().map(|f| f.stage), Some(Stage::IdeaValidation));
    assert!(ctx.extra().decision_index.is_none());

    let err = decision_index::attach(ctx).unwrap_err();
    assert!(matches!(
        err,
        KernelError::Precondition {
            operation: "decision index",
            ..
        }
    ));
}

#[test]
fn malformed_replies_are_repaired_not_fatal() {
    let backend = ScriptedBackend::new(vec![
        Ok(json!({"valid": "maybe", "clarity_score": -3, "summary": ""})),
        Ok(json!({"market_size": "huge", "trend": "rising", "competition_level": "high"})),
        Ok(json!({"verdict": "yolo", "risk_factors": [{"name": "burnout"}], "overall_risk_level": "high"})),
        Ok(json!(null)),
    ]);
    let outcome =
        run_decision(&backend, BUDGET, DecisionRequest::new(sample_input())).expect("run");

    assert!(outcome.is_done());
    let ctx = &outcome.context;
    let idea = ctx.stage_outputs().idea().expect("idea");
    assert!(idea.valid);
    assert_eq!(idea.clarity_score, 5);

    let strategy = ctx.stage_outputs().strategy().expect("strategy");
    assert_eq!(strategy.verdict, None);
    assert!(strategy.risk_factors.is_empty());

    let repaired = &ctx
        .meta()
        .provenance_for(Stage::StrategyAdvice)
        .expect("strategy provenance")
        .repaired_fields;
    assert!(repaired.contains(&"verdict".to_string()));
    assert!(repaired.contains(&"risk_factors".to_string()));

    let reflection = ctx.reflection().expect("reflection");
    assert!(!reflection.conflicts.is_empty());
}

/// Verifies reflection on a context missing strategy advice fails without touching it.
#[test]
fn reflection_precondition_leaves_context_unchanged() {
    let backend = ScriptedBackend::new(Vec::new());
    let pipeline = Pipeline::new(&backend, BUDGET).expect("pipeline");
    let ctx = context_with_stages(2);
    let before = ctx.clone();

    match pipeline.reflect(&ctx) {
        Err(KernelError::Precondition { operation, missing }) => {
            assert_eq!(operation, "reflection");
            assert_eq!(missing, vec!["strategy_advice"]);
        }
        other => panic!("expected precondition error, got {other:?}"),
    }
    assert_eq!(ctx, before);
    assert!(backend.calls().is_empty());
}

#[test]
fn critical_calmness_downgrades_one_step() {
    let request =
        DecisionRequest::new(sample_input()).with_calmness(CalmnessAnswers::new(2, 2, 2, 2));
    let outcome = run_decision(&OfflineBackend, BUDGET, request).expect("run");
    let index = outcome
        .context
        .extra()
        .decision_index
        .as_ref()
        .expect("index");

    assert_eq!(index.calm_state, CalmState::Critical);
    assert_eq!(index.recommendation, index.unguarded_recommendation.downgrade());
    assert!(!index.prescriptions.is_empty());
}

/// Verifies rescoring a persisted record reproduces the attached index exactly.
#[test]
fn rescoring_a_record_is_deterministic() {
    let request =
        DecisionRequest::new(sample_input()).with_calmness(CalmnessAnswers::new(1, 0, 1, 0));
    let outcome = run_decision(&OfflineBackend, BUDGET, request).expect("run");
    let record = serde_json::to_value(&outcome.context).expect("serialize");

    let first = score_record(&record).expect("rescore");
    let second = score_record(&record).expect("rescore");
    assert_eq!(first, second);
    assert_eq!(Some(&first), outcome.context.extra().decision_index.as_ref());
}

#[test]
fn structurally_invalid_record_is_rejected() {
    let record = json!({"stage_outputs": {"idea_validation": {}}});
    let err = score_record(&record).unwrap_err();
    assert!(matches!(err, KernelError::Structural(_)));
}

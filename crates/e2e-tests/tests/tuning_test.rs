//! End-to-end tuning loop tests.
//!
//! Latency regression -> safe index rebuild, the learning step with its
//! audit entry, and approval gating when cycles race.

use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;

use e2e_tests::{gaussian_vector, test_settings, TestHarness};
use landmark_retrieval::MetricsCollector;
use landmark_tuning::WeightUpdate;
use landmark_types::{
    ActionState, HypothesisKind, MetricEvent, MetricOutcome, QuerySample, Risk,
};

const DIM: usize = 32;

/// `count` samples with the given stage-1 latency, stamped `age` ago.
fn record_window(metrics: &MetricsCollector, count: usize, stage1_ms: u64, age: Duration) {
    let start = Utc::now() - chrono::Duration::from_std(age).unwrap();
    for i in 0..count {
        metrics.record(
            QuerySample::new(
                Duration::from_millis(stage1_ms),
                Duration::from_millis(1),
                100,
                10,
            )
            .with_timestamp(start + chrono::Duration::milliseconds(i as i64)),
        );
    }
}

fn populated_harness(settings: landmark_types::Settings, count: usize) -> TestHarness {
    let mut rng = StdRng::seed_from_u64(count as u64);
    let harness = TestHarness::with_settings(settings);
    let vectors: Vec<Vec<f32>> = (0..count).map(|_| gaussian_vector(&mut rng, DIM)).collect();
    harness.insert_all(&vectors, "blob://tuning");
    harness
}

#[tokio::test]
async fn test_latency_regression_proposes_safe_rebuild_first() {
    let harness = populated_harness(test_settings(DIM), 100);
    let tuning = harness.engine.tuning();
    let metrics = harness.engine.retrieval().metrics();

    record_window(metrics, 50, 2, Duration::from_secs(120));
    let warmup = tuning.observe("warmup").await.unwrap().unwrap();
    assert!(warmup.baseline_established);
    let baseline = metrics.baseline().unwrap();
    assert!((baseline.stage1_p50_ms - 2.0).abs() < 1e-9);

    // 50 consecutive samples at 5x the baseline
    record_window(metrics, 50, 10, Duration::from_secs(60));
    let observation = tuning.observe("regressed").await.unwrap().unwrap();
    assert!(!observation.baseline_established);
    assert!((observation.window.stage1_p50_ms - 10.0).abs() < 1e-9);

    let (hypotheses, errors) = tuning.hypothesize(&observation);
    assert!(errors.is_empty(), "detector errors: {:?}", errors);
    let top = &hypotheses[0];
    assert_eq!(top.kind, HypothesisKind::IndexRebuild);
    assert_eq!(top.risk, Risk::Safe);
    assert!(hypotheses.iter().all(|h| h.priority <= top.priority));

    // Safe, so a full cycle runs it without approval
    let report = harness.engine.run_tuning_cycle().await.unwrap();
    assert!(!report.executed.is_empty());
    assert!(report.failures.is_empty());
    assert!(harness
        .engine
        .list_pending()
        .iter()
        .all(|a| a.hypothesis.kind != HypothesisKind::IndexRebuild));
    assert_eq!(harness.engine.retrieval().index().len(), 100);
}

#[tokio::test]
async fn test_learn_step_updates_importance_and_audits() {
    let mut settings = test_settings(DIM);
    settings.tuning.learning_rate = 0.1;
    let harness = TestHarness::with_settings(settings);
    let id = harness.engine.insert(vec![0.3; DIM], "blob://learn").unwrap();
    assert_eq!(harness.engine.get_atom(&id).unwrap().importance, 1.0);

    let learner = harness.engine.tuning().learner();
    let entry = match learner
        .apply_weight_update("cycle-1", "hyp-1", &id, 1.0, 0.5)
        .unwrap()
    {
        WeightUpdate::Applied(entry) => entry,
        other => panic!("expected an applied update, got {:?}", other),
    };
    assert!((entry.value - 1.05).abs() < 1e-6);
    assert!((entry.delta - 0.05).abs() < 1e-6);
    assert_eq!(entry.previous, 1.0);
    assert_eq!(entry.outcome_score, 0.5);

    let importance = harness.engine.retrieval().catalog().importance(&id).unwrap();
    assert!((importance - 1.05).abs() < 1e-6);

    let audit = harness.engine.audit_log(10).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].atom_id, id);
    assert_eq!(audit[0].delta, entry.delta);

    // Replaying the same outcome changes nothing
    assert!(matches!(
        learner
            .apply_weight_update("cycle-2", "hyp-1", &id, 1.0, 0.5)
            .unwrap(),
        WeightUpdate::AlreadyApplied
    ));
    assert_eq!(harness.engine.audit_log(10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_racing_cycles_queue_one_action_and_rejection_holds() {
    let mut settings = test_settings(DIM);
    settings.tuning.prune_idle_secs = 0;
    settings.tuning.prune_importance_floor = 0.5;
    let harness = populated_harness(settings, 30);
    let engine = &harness.engine;

    let low: Vec<_> = engine
        .retrieval()
        .catalog()
        .coords()
        .into_iter()
        .take(5)
        .map(|(id, _)| id)
        .collect();
    for id in &low {
        engine.retrieval().catalog().set_importance(id, 0.1);
    }
    for i in 0..20 {
        engine.record_metric(&MetricEvent::new(
            format!("evt-{}", i),
            "search",
            3.0,
            MetricOutcome::Success,
        ));
    }

    let (a, b, c, d) = tokio::join!(
        engine.run_tuning_cycle(),
        engine.run_tuning_cycle(),
        engine.run_tuning_cycle(),
        engine.run_tuning_cycle(),
    );
    let queued: usize = [a, b, c, d]
        .into_iter()
        .map(|r| r.unwrap().queued.len())
        .sum();
    assert_eq!(queued, 1);

    let pending = engine.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].hypothesis.kind, HypothesisKind::PruneLowImportance);
    assert_eq!(pending[0].hypothesis.risk, Risk::RequiresApproval);

    let rejected = engine
        .reject(&pending[0].id, Some("keep them".to_string()))
        .unwrap();
    assert_eq!(rejected.state, ActionState::Rejected);
    assert!(engine.approve(&pending[0].id).is_err());

    engine.run_tuning_cycle().await.unwrap();
    for id in &low {
        assert!(engine.get_atom(id).is_some());
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_core::{FakeClock, WorkerGuid, WorkerRecord, WorkflowBuilder};
use hermod_store::{FlakyStore, MemoryStore};

fn evaluator(
    debounce: Duration,
    leases_required: bool,
) -> (Arc<MemoryStore<FakeClock>>, FakeClock, ReadinessEvaluator<FakeClock>) {
    let clock = FakeClock::new();
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let eval = ReadinessEvaluator::with_clock(
        store.clone() as Arc<dyn MetadataStore>,
        debounce,
        leases_required,
        clock.clone(),
    );
    (store, clock, eval)
}

#[tokio::test]
async fn healthy_store_reports_ok() {
    let (_store, _clock, eval) = evaluator(Duration::ZERO, false);
    let report = eval.evaluate().await;
    assert!(report.is_ok());
    assert_eq!(report.checks["database"].status, ReadyStatus::Ok);
    assert_eq!(report.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn database_failure_gates_overall_status() {
    let clock = FakeClock::new();
    let inner = Arc::new(MemoryStore::with_clock(clock.clone()));
    // Enough failures to cover both list calls of one evaluation.
    let flaky: Arc<dyn MetadataStore> = Arc::new(FlakyStore::failing(inner, 2));
    let eval = ReadinessEvaluator::with_clock(flaky, Duration::ZERO, false, clock);

    let report = eval.evaluate().await;
    assert!(!report.is_ok());
    assert_eq!(report.checks["database"].status, ReadyStatus::Error);
}

#[tokio::test]
async fn worker_counts_split_recent_and_stale() {
    let (store, clock, eval) = evaluator(Duration::ZERO, false);
    store
        .register_worker(&WorkerRecord::new(WorkerGuid::new("w-old"), "old", "h:1"))
        .await
        .unwrap();
    clock.advance(Duration::from_secs(120));
    store
        .register_worker(&WorkerRecord::new(WorkerGuid::new("w-new"), "new", "h:2"))
        .await
        .unwrap();

    let report = eval.evaluate().await;
    let workers = &report.checks["workers"];
    assert_eq!(workers.recent, Some(1));
    assert_eq!(workers.stale, Some(1));
}

#[tokio::test]
async fn unleased_active_workflows_fail_the_lease_check_without_gating() {
    let (store, _clock, eval) = evaluator(Duration::ZERO, false);
    store
        .put_workflow(&WorkflowBuilder::source_to_sink("wf-1", "s", "k").build())
        .await
        .unwrap();

    let report = eval.evaluate().await;
    assert!(report.is_ok(), "lease failures are non-gating by default");
    assert_eq!(report.checks["leases"].status, ReadyStatus::Error);
}

#[tokio::test]
async fn leases_required_makes_lease_failures_gating() {
    let (store, _clock, eval) = evaluator(Duration::ZERO, true);
    store
        .put_workflow(&WorkflowBuilder::source_to_sink("wf-1", "s", "k").build())
        .await
        .unwrap();

    let report = eval.evaluate().await;
    assert!(!report.is_ok());

    // Leasing the workflow heals the report.
    assert!(store
        .acquire_workflow_lease(&"wf-1".into(), &WorkerGuid::new("w"), Duration::from_secs(60))
        .await
        .unwrap());
    let report = eval.evaluate().await;
    assert!(report.is_ok());
}

#[tokio::test]
async fn debounce_reuses_the_previous_report() {
    let (store, clock, eval) = evaluator(Duration::from_secs(5), false);
    let first = eval.evaluate().await;
    assert!(first.is_ok());

    // The fleet degrades, but the cached report is still served.
    store
        .put_workflow(&WorkflowBuilder::source_to_sink("wf-1", "s", "k").build())
        .await
        .unwrap();
    let second = eval.evaluate().await;
    assert_eq!(second.checks["leases"].status, ReadyStatus::Ok);

    // Past the window, the fresh state is observed.
    clock.advance(Duration::from_secs(6));
    let third = eval.evaluate().await;
    assert_eq!(third.checks["leases"].status, ReadyStatus::Error);
}

#[tokio::test]
async fn report_serializes_with_checks_dictionary() {
    let (_store, _clock, eval) = evaluator(Duration::ZERO, false);
    let report = eval.evaluate().await;
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["checks"]["database"]["status"].is_string());
    assert!(json["version"].is_string());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_core::{WorkerGuid, WorkflowBuilder};
use hermod_store::{MemoryStore, WorkerFilter};
use std::time::Duration;

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn fast_env() -> EnvConfig {
    EnvConfig {
        reconcile_period: Duration::from_millis(50),
        ..EnvConfig::default()
    }
}

#[tokio::test]
async fn startup_registers_and_reaches_steady_state() {
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
    let identity = WorkerIdentity::new(WorkerGuid::new("w-1"), 0, 1);
    let worker = startup(store.clone(), identity, fast_env()).await.unwrap();

    let workers = store.list_workers(&WorkerFilter::default()).await.unwrap();
    assert_eq!(workers.len(), 1);

    let report = worker.readiness().evaluate().await;
    assert!(report.is_ok());

    worker.shutdown().await;
}

#[tokio::test]
async fn loop_converges_on_workflows_created_after_startup() {
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
    let identity = WorkerIdentity::new(WorkerGuid::new("w-1"), 0, 1);
    let worker = startup(store.clone(), identity, fast_env()).await.unwrap();

    // The control plane creates a workflow while the worker is running.
    let hub_backed = WorkflowBuilder::source_to_sink("wf-late", "ep-in", "ep-out").build();
    store
        .put_endpoint(&hermod_core::Endpoint::new("ep-in", "memory"))
        .await
        .unwrap();
    store
        .put_endpoint(&hermod_core::Endpoint::new("ep-out", "memory"))
        .await
        .unwrap();
    store.put_workflow(&hub_backed).await.unwrap();

    let engines = worker.engines().clone();
    eventually("reconciler converges", || engines.is_running(&"wf-late".into())).await;

    worker.shutdown().await;
    assert!(engines.running().is_empty());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::FlakyStore;
use hermod_core::{FakeClock, LogLevel, WorkflowBuilder};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

fn store() -> (MemoryStore<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    (MemoryStore::with_clock(clock.clone()), clock)
}

async fn seed_workflow(store: &MemoryStore<FakeClock>, id: &str) -> WorkflowId {
    let wf = WorkflowBuilder::source_to_sink(id, "ep-src", "ep-sink").build();
    store.put_workflow(&wf).await.unwrap();
    wf.id
}

#[tokio::test]
async fn acquire_on_unleased_workflow_succeeds() {
    let (store, _clock) = store();
    let id = seed_workflow(&store, "wf-1").await;
    let owner = WorkerGuid::new("w-a");

    assert!(store.acquire_workflow_lease(&id, &owner, TTL).await.unwrap());
    let wf = store.get_workflow(&id).await.unwrap();
    assert_eq!(wf.owner_id, Some(owner));
    assert!(wf.lease_until_ms.is_some());
}

#[tokio::test]
async fn acquire_is_exclusive_while_lease_valid() {
    let (store, _clock) = store();
    let id = seed_workflow(&store, "wf-1").await;

    assert!(store.acquire_workflow_lease(&id, &"w-a".into(), TTL).await.unwrap());
    assert!(!store.acquire_workflow_lease(&id, &"w-b".into(), TTL).await.unwrap());
}

#[tokio::test]
async fn acquire_by_current_owner_extends_the_lease() {
    let (store, clock) = store();
    let id = seed_workflow(&store, "wf-1").await;
    let owner = WorkerGuid::new("w-a");

    assert!(store.acquire_workflow_lease(&id, &owner, TTL).await.unwrap());
    let first = store.get_workflow(&id).await.unwrap().lease_until_ms;
    clock.advance(Duration::from_secs(10));
    assert!(store.acquire_workflow_lease(&id, &owner, TTL).await.unwrap());
    let second = store.get_workflow(&id).await.unwrap().lease_until_ms;
    assert!(second > first);
}

#[tokio::test]
async fn expired_lease_can_be_taken_over() {
    let (store, clock) = store();
    let id = seed_workflow(&store, "wf-1").await;

    assert!(store.acquire_workflow_lease(&id, &"w-a".into(), TTL).await.unwrap());
    clock.advance(TTL + Duration::from_millis(1));
    assert!(store.acquire_workflow_lease(&id, &"w-b".into(), TTL).await.unwrap());
    let wf = store.get_workflow(&id).await.unwrap();
    assert_eq!(wf.owner_id, Some(WorkerGuid::new("w-b")));
}

#[tokio::test]
async fn renew_succeeds_only_for_live_owner() {
    let (store, clock) = store();
    let id = seed_workflow(&store, "wf-1").await;
    let owner = WorkerGuid::new("w-a");

    assert!(store.acquire_workflow_lease(&id, &owner, TTL).await.unwrap());
    assert!(store.renew_workflow_lease(&id, &owner, TTL).await.unwrap());
    assert!(!store.renew_workflow_lease(&id, &"w-b".into(), TTL).await.unwrap());

    // A zombie owner cannot renew an expired lease.
    clock.advance(TTL + Duration::from_millis(1));
    assert!(!store.renew_workflow_lease(&id, &owner, TTL).await.unwrap());
}

#[tokio::test]
async fn release_clears_only_matching_owner() {
    let (store, _clock) = store();
    let id = seed_workflow(&store, "wf-1").await;
    let owner = WorkerGuid::new("w-a");

    assert!(store.acquire_workflow_lease(&id, &owner, TTL).await.unwrap());
    store.release_workflow_lease(&id, &"w-b".into()).await.unwrap();
    assert!(store.get_workflow(&id).await.unwrap().owner_id.is_some());

    store.release_workflow_lease(&id, &owner).await.unwrap();
    let wf = store.get_workflow(&id).await.unwrap();
    assert!(wf.owner_id.is_none());
    assert!(wf.lease_until_ms.is_none());
}

#[tokio::test]
async fn put_workflow_preserves_lease_fields() {
    let (store, _clock) = store();
    let id = seed_workflow(&store, "wf-1").await;
    let owner = WorkerGuid::new("w-a");
    assert!(store.acquire_workflow_lease(&id, &owner, TTL).await.unwrap());

    // A control-plane update must not clobber the lease.
    let mut updated = store.get_workflow(&id).await.unwrap();
    updated.name = "renamed".to_string();
    updated.owner_id = None;
    updated.lease_until_ms = None;
    store.put_workflow(&updated).await.unwrap();

    let wf = store.get_workflow(&id).await.unwrap();
    assert_eq!(wf.name, "renamed");
    assert_eq!(wf.owner_id, Some(owner));
}

#[tokio::test]
async fn delete_requires_inactive() {
    let (store, _clock) = store();
    let id = seed_workflow(&store, "wf-1").await;

    let err = store.delete_workflow(&id).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidState(_)));

    let mut wf = store.get_workflow(&id).await.unwrap();
    wf.active = false;
    store.put_workflow(&wf).await.unwrap();
    store.delete_workflow(&id).await.unwrap();
    assert!(matches!(
        store.get_workflow(&id).await.unwrap_err(),
        StoreError::NotFound { .. }
    ));
}

#[tokio::test]
async fn list_workflows_filters_and_sorts() {
    let (store, _clock) = store();
    seed_workflow(&store, "wf-b").await;
    seed_workflow(&store, "wf-a").await;
    let inactive = WorkflowBuilder::source_to_sink("wf-c", "s", "k").active(false).build();
    store.put_workflow(&inactive).await.unwrap();

    let all = store.list_workflows(&WorkflowFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, "wf-a");

    let active = store.list_workflows(&WorkflowFilter::active()).await.unwrap();
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn heartbeat_updates_last_seen_from_store_clock() {
    let (store, clock) = store();
    let guid = WorkerGuid::new("w-a");
    store
        .register_worker(&WorkerRecord::new(guid.clone(), "worker-a", "127.0.0.1:9400"))
        .await
        .unwrap();

    clock.advance(Duration::from_secs(5));
    store.update_worker_heartbeat(&guid, 10.0, 20.0).await.unwrap();
    let workers = store.list_workers(&WorkerFilter::default()).await.unwrap();
    assert_eq!(workers[0].last_seen_ms, clock.epoch_ms());
    assert_eq!(workers[0].cpu_percent, 10.0);

    let recent = store
        .list_workers(&WorkerFilter { seen_within_ms: Some(1_000) })
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    clock.advance(Duration::from_secs(2));
    let recent = store
        .list_workers(&WorkerFilter { seen_within_ms: Some(1_000) })
        .await
        .unwrap();
    assert!(recent.is_empty());
}

#[tokio::test]
async fn heartbeat_for_unknown_worker_fails() {
    let (store, _clock) = store();
    let err = store
        .update_worker_heartbeat(&"ghost".into(), 0.0, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn node_state_roundtrip() {
    let (store, _clock) = store();
    let id = seed_workflow(&store, "wf-1").await;
    let node = NodeId::new("dedup");

    assert_eq!(store.get_node_state(&id, &node).await.unwrap(), None);
    store.put_node_state(&id, &node, b"state-v1").await.unwrap();
    assert_eq!(
        store.get_node_state(&id, &node).await.unwrap(),
        Some(b"state-v1".to_vec())
    );
}

#[tokio::test]
async fn traces_append_list_purge() {
    let (store, _clock) = store();
    let id = seed_workflow(&store, "wf-1").await;
    let msg = MessageId::new("msg-1");
    let steps = vec![
        TraceStep::new(
            id.clone(),
            msg.clone(),
            NodeId::new("src"),
            100,
            hermod_core::TraceOutcome::Ok,
        ),
        TraceStep::new(
            id.clone(),
            msg.clone(),
            NodeId::new("out"),
            200,
            hermod_core::TraceOutcome::Delivered,
        ),
    ];
    store.append_trace_steps(&steps).await.unwrap();

    let listed = store.list_trace_steps(&id, Some(&msg)).await.unwrap();
    assert_eq!(listed.len(), 2);

    let purged = store.purge_trace_steps(&id, 150).await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(store.list_trace_steps(&id, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn approvals_resolve_once() {
    let (store, _clock) = store();
    let id = seed_workflow(&store, "wf-1").await;
    let approval = Approval::pending(
        id.clone(),
        NodeId::new("gate"),
        MessageId::new("msg-1"),
        100,
    );
    store.create_approval(&approval).await.unwrap();

    let resolved = store.resolve_approval(&approval.id, "true").await.unwrap();
    assert_eq!(
        resolved.status,
        hermod_core::ApprovalStatus::Resolved { branch: "true".to_string() }
    );

    let err = store.resolve_approval(&approval.id, "false").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn outbox_lifecycle() {
    let (store, _clock) = store();
    let mut item = OutboxItem::pending(b"payload".to_vec(), 100);
    store.create_outbox_item(&item).await.unwrap();

    let pending = store.list_outbox_items(Some(OutboxStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);

    item.status = OutboxStatus::Delivered;
    item.attempts = 1;
    store.update_outbox_item(&item).await.unwrap();
    assert!(store
        .list_outbox_items(Some(OutboxStatus::Pending))
        .await
        .unwrap()
        .is_empty());

    // Purge removes old delivered/failed items but never pending ones.
    let purged = store.purge_outbox(200).await.unwrap();
    assert_eq!(purged, 1);
}

#[tokio::test]
async fn logs_are_stamped_and_limited() {
    let (store, _clock) = store();
    for i in 0..5 {
        store
            .append_log(&LogEntry::new(1_000 + i, LogLevel::Info, format!("line {i}")))
            .await
            .unwrap();
    }
    let logs = store.list_logs(None, 3).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[2].message, "line 4");
    assert!(!logs[0].timestamp.is_empty());

    let purged = store.purge_logs(1_003).await.unwrap();
    assert_eq!(purged, 3);
}

#[tokio::test]
async fn flaky_store_fails_then_recovers() {
    let clock = FakeClock::new();
    let inner = Arc::new(MemoryStore::with_clock(clock));
    let flaky = FlakyStore::failing(inner.clone(), 2);

    let wf = WorkflowBuilder::source_to_sink("wf-1", "s", "k").build();
    inner.put_workflow(&wf).await.unwrap();

    assert!(flaky.get_workflow(&wf.id).await.unwrap_err().is_transient());
    assert!(flaky.get_workflow(&wf.id).await.unwrap_err().is_transient());
    assert!(flaky.get_workflow(&wf.id).await.is_ok());
    assert_eq!(flaky.failures_served(), 2);
}

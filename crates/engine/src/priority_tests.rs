// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_adapters::{MemoryHub, Sink};
use hermod_core::Operation;
use serde_json::json;

fn setup() -> (MemoryHub, PrioritySource) {
    let hub = MemoryHub::new();
    let primary = Box::new(hub.build_source("ep-in"));
    let dlq = Box::new(hub.build_queue("ep-dlq"));
    (hub.clone(), PrioritySource::new(primary, dlq))
}

#[tokio::test]
async fn dlq_items_drain_before_primary_reads() {
    let (hub, mut source) = setup();
    hub.queue("ep-dlq").push("t", json!({"stored": 1}));
    hub.queue("ep-dlq").push("t", json!({"stored": 2}));
    hub.source("ep-in").push("t", Operation::Create, json!({"fresh": 1}));

    source.open().await.unwrap();
    let cancel = CancellationToken::new();

    let first = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(first.data["stored"], json!(1));
    assert_eq!(first.metadata.get(ORIGIN_KEY).map(String::as_str), Some(ORIGIN_DLQ));

    let second = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(second.data["stored"], json!(2));

    let third = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(third.data["fresh"], json!(1));
    assert_eq!(third.metadata.get(ORIGIN_KEY).map(String::as_str), Some(ORIGIN_PRIMARY));
}

#[tokio::test]
async fn items_dead_lettered_mid_run_are_drained_on_the_next_read() {
    let (hub, mut source) = setup();
    hub.source("ep-in").push("t", Operation::Create, json!({"fresh": 1}));
    source.open().await.unwrap();
    let cancel = CancellationToken::new();

    let first = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(first.data["fresh"], json!(1));

    // Something lands on the DLQ while the workflow runs.
    let mut dlq_writer = hub.build_queue("ep-dlq");
    let mut msg = hermod_core::PooledMessage::new();
    msg.data.insert("requeued".into(), json!(true));
    Sink::write(&mut dlq_writer, &msg).await.unwrap();
    drop(msg);
    hub.source("ep-in").push("t", Operation::Create, json!({"fresh": 2}));

    let next = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(next.data["requeued"], json!(true));
}

#[tokio::test]
async fn acks_route_back_to_origin() {
    let (hub, mut source) = setup();
    hub.queue("ep-dlq").push("t", json!({"stored": 1}));
    hub.source("ep-in").push("t", Operation::Create, json!({"fresh": 1}));
    source.open().await.unwrap();
    let cancel = CancellationToken::new();

    let replayed = source.read(&cancel).await.unwrap().unwrap();
    let fresh = source.read(&cancel).await.unwrap().unwrap();

    // Acking the DLQ message must not advance the primary cursor.
    source.ack(replayed.id.clone(), replayed.offset).await.unwrap();
    assert_eq!(hub.source("ep-in").acked_offset(), 0);

    source.ack(fresh.id.clone(), fresh.offset).await.unwrap();
    assert_eq!(hub.source("ep-in").acked_offset(), 1);
}

#[tokio::test]
async fn primary_end_of_stream_passes_through() {
    let (hub, mut source) = setup();
    hub.source("ep-in").finish();
    source.open().await.unwrap();
    let cancel = CancellationToken::new();
    assert!(source.read(&cancel).await.unwrap().is_none());
}

#[test]
fn wrap_requires_dlq_when_prioritized() {
    let hub = MemoryHub::new();
    let primary = Box::new(hub.build_source("ep-in"));
    let result = wrap_if_prioritized(true, primary, None);
    let err = match result {
        Ok(_) => panic!("expected wrap_if_prioritized to fail without a DLQ"),
        Err(err) => err,
    };
    assert!(matches!(err, crate::error::EngineError::Config(_)));
}

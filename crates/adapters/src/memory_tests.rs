// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::sink::Sink;
use crate::source::Source;
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn hub() -> MemoryHub {
    MemoryHub::new()
}

#[tokio::test]
async fn source_reads_seeded_messages_in_order_with_offsets() {
    let hub = hub();
    let handle = hub.source("ep-in");
    handle.push("orders", Operation::Create, json!({"n": 1}));
    handle.push("orders", Operation::Update, json!({"n": 2}));

    let mut source = hub.build_source("ep-in");
    source.open().await.unwrap();
    let cancel = CancellationToken::new();

    let first = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(first.offset, 1);
    assert_eq!(first.topic, "orders");
    assert_eq!(first.operation, Operation::Create);
    assert_eq!(first.data["n"], json!(1));
    assert!(!first.id.is_empty());

    let second = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(second.offset, 2);
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn source_blocks_until_pushed() {
    let hub = hub();
    let handle = hub.source("ep-in");
    let mut source = hub.build_source("ep-in");
    source.open().await.unwrap();
    let cancel = CancellationToken::new();

    let pusher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.push("t", Operation::Create, json!({"late": true}));
    });

    let msg = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(msg.data["late"], json!(true));
    pusher.await.unwrap();
}

#[tokio::test]
async fn source_read_observes_cancellation() {
    let hub = hub();
    let mut source = hub.build_source("ep-empty");
    source.open().await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = source.read(&cancel).await;
    assert!(matches!(result, Err(AdapterError::Closed)));
}

#[tokio::test]
async fn finished_source_reports_end_of_stream() {
    let hub = hub();
    let handle = hub.source("ep-in");
    handle.push("t", Operation::Create, json!({}));
    handle.finish();

    let mut source = hub.build_source("ep-in");
    source.open().await.unwrap();
    let cancel = CancellationToken::new();

    assert!(source.read(&cancel).await.unwrap().is_some());
    assert!(source.read(&cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn ack_is_idempotent_and_monotonic() {
    let hub = hub();
    let handle = hub.source("ep-in");
    let mut source = hub.build_source("ep-in");

    source.ack(MessageId::new("msg-a"), 3).await.unwrap();
    source.ack(MessageId::new("msg-a"), 3).await.unwrap();
    source.ack(MessageId::new("msg-b"), 2).await.unwrap();
    assert_eq!(handle.acked_offset(), 3);
    assert_eq!(source.state().get("offset").map(String::as_str), Some("3"));
}

#[tokio::test]
async fn seek_repositions_the_cursor() {
    let hub = hub();
    let handle = hub.source("ep-in");
    for n in 1..=5 {
        handle.push("t", Operation::Create, json!({ "n": n }));
    }
    let mut source = hub.build_source("ep-in");
    source.open().await.unwrap();
    let cancel = CancellationToken::new();

    source.seek(3).unwrap();
    let msg = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(msg.offset, 4);
    assert_eq!(msg.data["n"], json!(4));
}

#[tokio::test]
async fn set_state_resumes_from_acked_offset() {
    let hub = hub();
    let handle = hub.source("ep-in");
    handle.push("t", Operation::Create, json!({"n": 1}));
    handle.push("t", Operation::Create, json!({"n": 2}));

    let mut source = hub.build_source("ep-in");
    source.open().await.unwrap();
    source.set_state(std::collections::HashMap::from([(
        "offset".to_string(),
        "1".to_string(),
    )]));
    let cancel = CancellationToken::new();
    let msg = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(msg.data["n"], json!(2));
}

#[tokio::test]
async fn sink_records_writes_and_scripted_failures() {
    let hub = hub();
    let handle = hub.sink("ep-out");
    handle.fail_times(2);
    let mut sink = hub.build_sink("ep-out");

    let mut msg = hermod_core::PooledMessage::new();
    msg.topic.push_str("t");
    msg.data.insert("k".into(), json!("v"));

    assert!(sink.write(&msg).await.is_err());
    assert!(sink.write(&msg).await.is_err());
    sink.write(&msg).await.unwrap();

    assert_eq!(handle.attempts(), 3);
    let writes = handle.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].data["k"], json!("v"));
}

#[tokio::test]
async fn sink_failures_are_transient() {
    let hub = hub();
    hub.sink("ep-out").fail_always(true);
    let mut sink = hub.build_sink("ep-out");
    let msg = hermod_core::PooledMessage::new();
    let err = sink.write(&msg).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn queue_roundtrips_messages_and_reports_empty() {
    let hub = hub();
    let mut queue = hub.build_queue("ep-dlq");
    let cancel = CancellationToken::new();

    // Empty queue reads as drained, not blocking.
    assert!(Source::read(&mut queue, &cancel).await.unwrap().is_none());

    let mut msg = hermod_core::PooledMessage::new();
    msg.topic.push_str("orders");
    msg.data.insert("n".into(), json!(9));
    msg.metadata.insert("origin".into(), "primary".into());
    Sink::write(&mut queue, &msg).await.unwrap();
    drop(msg);

    assert_eq!(hub.queue("ep-dlq").len(), 1);
    let replayed = Source::read(&mut queue, &cancel).await.unwrap().unwrap();
    assert_eq!(replayed.topic, "orders");
    assert_eq!(replayed.data["n"], json!(9));
    assert_eq!(replayed.metadata.get("origin").map(String::as_str), Some("primary"));
    assert!(Source::read(&mut queue, &cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn queue_handle_seeds_items() {
    let hub = hub();
    let handle = hub.queue("ep-dlq");
    handle.push("t", json!({"stored": 1}));
    handle.push("t", json!({"stored": 2}));

    let mut queue = hub.build_queue("ep-dlq");
    let cancel = CancellationToken::new();
    let first = Source::read(&mut queue, &cancel).await.unwrap().unwrap();
    assert_eq!(first.data["stored"], json!(1));
}

#[tokio::test]
async fn optional_capabilities_default_to_unsupported() {
    let hub = hub();
    let sink = hub.build_sink("ep-out");
    assert!(matches!(sink.discover().await, Err(AdapterError::Unsupported(_))));
    assert!(matches!(sink.sample("orders", 5).await, Err(AdapterError::Unsupported(_))));

    let mut source = hub.build_source("ep-in");
    assert!(matches!(
        source.snapshot(&["orders".to_string()]).await,
        Err(AdapterError::Unsupported(_))
    ));
}

#[test]
fn non_object_data_is_wrapped() {
    let hub = hub();
    let handle = hub.source("ep-in");
    handle.push("t", Operation::Create, json!(42));
    assert_eq!(handle.seeded(), 1);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_core::{MessageId, NodeId, TraceOutcome, TraceStep, WorkflowId};
use hermod_store::{FlakyStore, MemoryStore, MetadataStore};

fn step(n: u64) -> TraceStep {
    TraceStep::new(
        WorkflowId::new("wf-1"),
        MessageId::new("msg-1"),
        NodeId::new("node"),
        n,
        TraceOutcome::Ok,
    )
}

#[test]
fn buffer_flags_flush_threshold() {
    let mut buffer = TraceBuffer::new();
    for n in 0..31 {
        buffer.push(step(n));
    }
    assert!(!buffer.should_flush());
    buffer.push(step(31));
    assert!(buffer.should_flush());
}

#[test]
fn ring_drops_oldest_past_capacity() {
    let mut buffer = TraceBuffer::new();
    for n in 0..300 {
        buffer.push(step(n));
    }
    assert_eq!(buffer.len(), 256);
    assert_eq!(buffer.dropped(), 44);
}

#[tokio::test]
async fn flush_writes_and_clears() {
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
    let mut buffer = TraceBuffer::new();
    buffer.push(step(1));
    buffer.push(step(2));

    assert!(buffer.flush(&store).await);
    assert!(buffer.is_empty());
    let listed = store
        .list_trace_steps(&WorkflowId::new("wf-1"), None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn failed_flush_keeps_steps_and_flags_degraded() {
    let inner = Arc::new(MemoryStore::new());
    let store: Arc<dyn MetadataStore> = Arc::new(FlakyStore::failing(inner, 1));
    let mut buffer = TraceBuffer::new();
    buffer.push(step(1));

    assert!(!buffer.flush(&store).await);
    assert!(buffer.is_degraded());
    assert_eq!(buffer.len(), 1);

    // Next flush succeeds and clears the flag.
    assert!(buffer.flush(&store).await);
    assert!(!buffer.is_degraded());
    assert!(buffer.is_empty());
}

#[tokio::test]
async fn empty_flush_is_a_noop() {
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
    let mut buffer = TraceBuffer::new();
    assert!(buffer.flush(&store).await);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_core::{WorkflowId, WorkflowStatus};

fn status_event(n: u64) -> StatusEvent {
    StatusEvent::new(WorkflowId::new("wf-1"), WorkflowStatus::Active, n)
}

#[tokio::test]
async fn subscribers_receive_published_events() {
    let bus = LiveEventBus::new();
    let mut rx = bus.subscribe_status();
    bus.publish_status(&status_event(1));
    let event = rx.recv().await.unwrap();
    assert_eq!(event.at_ms, 1);
}

#[tokio::test]
async fn publish_never_blocks_and_drops_slow_subscribers() {
    let bus = LiveEventBus::new();
    let _rx = bus.subscribe_status_with_buffer(1);
    assert_eq!(bus.status_subscriber_count(), 1);

    // Second publish overflows the buffer; the subscriber is dropped.
    bus.publish_status(&status_event(1));
    bus.publish_status(&status_event(2));
    assert_eq!(bus.status_subscriber_count(), 0);
}

#[tokio::test]
async fn dropped_receivers_are_pruned_on_next_publish() {
    let bus = LiveEventBus::new();
    let rx = bus.subscribe_status();
    drop(rx);
    bus.publish_status(&status_event(1));
    assert_eq!(bus.status_subscriber_count(), 0);
}

#[tokio::test]
async fn topics_are_independent() {
    let bus = LiveEventBus::new();
    let mut logs = bus.subscribe_logs();
    bus.publish_status(&status_event(1));
    bus.publish_log(&hermod_core::LogEntry::new(5, hermod_core::LogLevel::Info, "hello"));
    let entry = logs.recv().await.unwrap();
    assert_eq!(entry.message, "hello");
}

#[tokio::test]
async fn multiple_subscribers_all_receive() {
    let bus = LiveEventBus::new();
    let mut a = bus.subscribe_status();
    let mut b = bus.subscribe_status();
    bus.publish_status(&status_event(9));
    assert_eq!(a.recv().await.unwrap().at_ms, 9);
    assert_eq!(b.recv().await.unwrap().at_ms, 9);
}

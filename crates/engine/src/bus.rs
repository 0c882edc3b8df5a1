// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process live event bus.
//!
//! Fan-out of status, log, and live-message events to websocket/SSE
//! subscribers of the control plane. Publishers never block: events go out
//! through bounded channels with `try_send`, and a subscriber that has fallen
//! behind (channel full) or gone away (receiver dropped) is removed on the
//! spot.

use hermod_core::{LiveMessage, LogEntry, StatusEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Default per-subscriber buffer.
const SUBSCRIBER_BUFFER: usize = 64;

struct Topic<T> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
}

impl<T: Clone> Topic<T> {
    fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()) }
    }

    fn subscribe(&self, buffer: usize) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(buffer);
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, event: &T) {
        self.subscribers.lock().retain(|tx| tx.try_send(event.clone()).is_ok());
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Publish-subscribe hub for the three live event kinds.
pub struct LiveEventBus {
    status: Topic<StatusEvent>,
    logs: Topic<LogEntry>,
    messages: Topic<LiveMessage>,
}

impl LiveEventBus {
    pub fn new() -> Self {
        Self { status: Topic::new(), logs: Topic::new(), messages: Topic::new() }
    }

    pub fn subscribe_status(&self) -> mpsc::Receiver<StatusEvent> {
        self.status.subscribe(SUBSCRIBER_BUFFER)
    }

    pub fn subscribe_logs(&self) -> mpsc::Receiver<LogEntry> {
        self.logs.subscribe(SUBSCRIBER_BUFFER)
    }

    pub fn subscribe_messages(&self) -> mpsc::Receiver<LiveMessage> {
        self.messages.subscribe(SUBSCRIBER_BUFFER)
    }

    /// Tiny-buffer subscription for backpressure tests.
    pub fn subscribe_status_with_buffer(&self, buffer: usize) -> mpsc::Receiver<StatusEvent> {
        self.status.subscribe(buffer)
    }

    pub fn publish_status(&self, event: &StatusEvent) {
        self.status.publish(event);
    }

    pub fn publish_log(&self, entry: &LogEntry) {
        self.logs.publish(entry);
    }

    pub fn publish_message(&self, event: &LiveMessage) {
        self.messages.publish(event);
    }

    pub fn status_subscriber_count(&self) -> usize {
        self.status.subscriber_count()
    }
}

impl Default for LiveEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;

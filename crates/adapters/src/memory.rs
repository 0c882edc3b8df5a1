// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory adapters behind the `memory` type discriminator.
//!
//! All adapters built from one [`MemoryHub`] share state by endpoint id, so a
//! test (or a single-process deployment) can seed a source, let an engine
//! run, and inspect what reached a sink. The same types are the execution
//! plane's test doubles; failure scripts are part of the sink handle.

use crate::error::{AdapterError, AdapterResult};
use crate::sink::{ReplayQueue, Sink};
use crate::source::Source;
use async_trait::async_trait;
use hermod_core::{Message, MessageId, Operation, PooledMessage};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Immutable snapshot of a message, recorded by sinks and stored by queues.
#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub message_id: MessageId,
    pub operation: Operation,
    pub topic: String,
    pub payload: Vec<u8>,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub metadata: HashMap<String, String>,
    pub offset: u64,
}

impl From<&Message> for RecordedMessage {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id.clone(),
            operation: message.operation,
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            data: message.data.clone(),
            metadata: message.metadata.clone(),
            offset: message.offset,
        }
    }
}

impl RecordedMessage {
    fn into_pooled(self) -> PooledMessage {
        let mut msg = PooledMessage::new();
        msg.id = self.message_id;
        msg.operation = self.operation;
        msg.topic = self.topic;
        msg.payload = self.payload;
        msg.data = self.data;
        msg.metadata = self.metadata;
        msg.offset = self.offset;
        msg
    }
}

/// A message waiting in a source stream.
#[derive(Debug, Clone)]
struct SeedMessage {
    topic: String,
    operation: Operation,
    data: serde_json::Map<String, serde_json::Value>,
    payload: Vec<u8>,
}

#[derive(Default)]
struct SourceShared {
    items: Vec<SeedMessage>,
    /// Index of the next item to read. Offsets are 1-based: item `i` is
    /// delivered with offset `i + 1`.
    cursor: usize,
    /// Durable cursor advanced by acks.
    acked_offset: u64,
    /// When set, an exhausted stream reads as end-of-stream instead of
    /// blocking.
    finished: bool,
}

struct SourceState {
    shared: Mutex<SourceShared>,
    notify: Notify,
}

/// Seeding and observation handle for a memory source stream.
#[derive(Clone)]
pub struct MemorySourceHandle {
    state: Arc<SourceState>,
}

impl MemorySourceHandle {
    /// Append a message with structured data on the given topic.
    pub fn push(&self, topic: &str, operation: Operation, data: serde_json::Value) {
        let data = match data {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let payload = serde_json::Value::Object(data.clone()).to_string().into_bytes();
        self.state.shared.lock().items.push(SeedMessage {
            topic: topic.to_string(),
            operation,
            data,
            payload,
        });
        self.state.notify.notify_one();
    }

    /// Mark the stream finite: once drained, reads return end-of-stream.
    pub fn finish(&self) {
        self.state.shared.lock().finished = true;
        self.state.notify.notify_one();
    }

    /// Durable cursor as advanced by acks.
    pub fn acked_offset(&self) -> u64 {
        self.state.shared.lock().acked_offset
    }

    pub fn seeded(&self) -> usize {
        self.state.shared.lock().items.len()
    }
}

/// Source adapter over a hub stream.
pub struct MemorySource {
    state: Arc<SourceState>,
    open: bool,
}

#[async_trait]
impl Source for MemorySource {
    async fn open(&mut self) -> AdapterResult<()> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> AdapterResult<()> {
        self.open = false;
        Ok(())
    }

    async fn ping(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn read(&mut self, cancel: &CancellationToken) -> AdapterResult<Option<PooledMessage>> {
        loop {
            if !self.open {
                return Err(AdapterError::Closed);
            }
            let notified = self.state.notify.notified();
            {
                let mut shared = self.state.shared.lock();
                if let Some(seed) = shared.items.get(shared.cursor).cloned() {
                    shared.cursor += 1;
                    let offset = shared.cursor as u64;
                    drop(shared);
                    let mut msg = PooledMessage::new();
                    msg.topic = seed.topic;
                    msg.operation = seed.operation;
                    msg.data = seed.data;
                    msg.payload = seed.payload;
                    msg.offset = offset;
                    return Ok(Some(msg));
                }
                if shared.finished {
                    return Ok(None);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Closed),
                _ = notified => {}
            }
        }
    }

    async fn ack(&mut self, _message_id: MessageId, offset: u64) -> AdapterResult<()> {
        let mut shared = self.state.shared.lock();
        // Idempotent: acking the same offset twice is a no-op.
        shared.acked_offset = shared.acked_offset.max(offset);
        Ok(())
    }

    fn state(&self) -> HashMap<String, String> {
        let shared = self.state.shared.lock();
        HashMap::from([("offset".to_string(), shared.acked_offset.to_string())])
    }

    fn set_state(&mut self, state: HashMap<String, String>) {
        if let Some(offset) = state.get("offset").and_then(|v| v.parse::<u64>().ok()) {
            self.state.shared.lock().cursor = offset as usize;
        }
    }

    fn seek(&mut self, offset: u64) -> AdapterResult<()> {
        // Position so the next delivered message carries offset + 1.
        self.state.shared.lock().cursor = offset as usize;
        Ok(())
    }
}

#[derive(Default)]
struct SinkShared {
    writes: Vec<RecordedMessage>,
    attempts: u64,
    fail_remaining: u32,
    fail_always: bool,
}

struct SinkState {
    shared: Mutex<SinkShared>,
}

/// Observation and failure-script handle for a memory sink.
#[derive(Clone)]
pub struct MemorySinkHandle {
    state: Arc<SinkState>,
}

impl MemorySinkHandle {
    /// Successful writes, in arrival order.
    pub fn writes(&self) -> Vec<RecordedMessage> {
        self.state.shared.lock().writes.clone()
    }

    /// Write attempts including failed ones.
    pub fn attempts(&self) -> u64 {
        self.state.shared.lock().attempts
    }

    /// Fail the next `n` writes with a transient error.
    #[cfg(any(test, feature = "test-support"))]
    pub fn fail_times(&self, n: u32) {
        self.state.shared.lock().fail_remaining = n;
    }

    /// Fail every write until cleared.
    #[cfg(any(test, feature = "test-support"))]
    pub fn fail_always(&self, enabled: bool) {
        self.state.shared.lock().fail_always = enabled;
    }
}

/// Sink adapter recording into hub state.
pub struct MemorySink {
    state: Arc<SinkState>,
}

#[async_trait]
impl Sink for MemorySink {
    async fn open(&mut self) -> AdapterResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> AdapterResult<()> {
        Ok(())
    }

    async fn ping(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn write(&mut self, message: &Message) -> AdapterResult<()> {
        let mut shared = self.state.shared.lock();
        shared.attempts += 1;
        if shared.fail_always {
            return Err(AdapterError::Connection("scripted failure".to_string()));
        }
        if shared.fail_remaining > 0 {
            shared.fail_remaining -= 1;
            return Err(AdapterError::Connection("scripted failure".to_string()));
        }
        shared.writes.push(RecordedMessage::from(message));
        Ok(())
    }
}

#[derive(Default)]
struct QueueShared {
    pending: VecDeque<RecordedMessage>,
    next_offset: u64,
}

struct QueueState {
    shared: Mutex<QueueShared>,
    notify: Notify,
}

/// Observation handle for a memory replay queue (DLQ).
#[derive(Clone)]
pub struct MemoryQueueHandle {
    state: Arc<QueueState>,
}

impl MemoryQueueHandle {
    pub fn len(&self) -> usize {
        self.state.shared.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed a stored item directly, as if a prior run dead-lettered it.
    pub fn push(&self, topic: &str, data: serde_json::Value) {
        let data = match data {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let mut shared = self.state.shared.lock();
        shared.next_offset += 1;
        let offset = shared.next_offset;
        shared.pending.push_back(RecordedMessage {
            message_id: MessageId::generate(),
            operation: Operation::Create,
            topic: topic.to_string(),
            payload: Vec::new(),
            data,
            metadata: HashMap::new(),
            offset,
        });
        self.state.notify.notify_one();
    }
}

/// Queue adapter: a sink that can be drained as a source.
///
/// Reads return `Ok(None)` when the queue is currently empty rather than
/// blocking, so a priority wrapper can fall through to its primary source.
pub struct MemoryQueue {
    state: Arc<QueueState>,
}

#[async_trait]
impl Source for MemoryQueue {
    async fn open(&mut self) -> AdapterResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> AdapterResult<()> {
        Ok(())
    }

    async fn ping(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn read(&mut self, _cancel: &CancellationToken) -> AdapterResult<Option<PooledMessage>> {
        let popped = self.state.shared.lock().pending.pop_front();
        Ok(popped.map(RecordedMessage::into_pooled))
    }

    async fn ack(&mut self, _message_id: MessageId, _offset: u64) -> AdapterResult<()> {
        // Items leave the queue on read; replayed deliveries rely on the
        // primary source's at-least-once window instead.
        Ok(())
    }
}

#[async_trait]
impl Sink for MemoryQueue {
    async fn open(&mut self) -> AdapterResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> AdapterResult<()> {
        Ok(())
    }

    async fn ping(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn write(&mut self, message: &Message) -> AdapterResult<()> {
        let mut shared = self.state.shared.lock();
        shared.next_offset += 1;
        let mut recorded = RecordedMessage::from(message);
        recorded.offset = shared.next_offset;
        shared.pending.push_back(recorded);
        self.state.notify.notify_one();
        Ok(())
    }
}

impl ReplayQueue for MemoryQueue {}

#[derive(Default)]
struct HubInner {
    sources: HashMap<String, Arc<SourceState>>,
    sinks: HashMap<String, Arc<SinkState>>,
    queues: HashMap<String, Arc<QueueState>>,
}

/// Shared broker for all memory adapters built from one registry.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream handle for the given endpoint id, created on first use.
    pub fn source(&self, endpoint_id: &str) -> MemorySourceHandle {
        let state = self.source_state(endpoint_id);
        MemorySourceHandle { state }
    }

    pub fn sink(&self, endpoint_id: &str) -> MemorySinkHandle {
        let state = self.sink_state(endpoint_id);
        MemorySinkHandle { state }
    }

    pub fn queue(&self, endpoint_id: &str) -> MemoryQueueHandle {
        let state = self.queue_state(endpoint_id);
        MemoryQueueHandle { state }
    }

    pub fn build_source(&self, endpoint_id: &str) -> MemorySource {
        MemorySource { state: self.source_state(endpoint_id), open: false }
    }

    pub fn build_sink(&self, endpoint_id: &str) -> MemorySink {
        MemorySink { state: self.sink_state(endpoint_id) }
    }

    pub fn build_queue(&self, endpoint_id: &str) -> MemoryQueue {
        MemoryQueue { state: self.queue_state(endpoint_id) }
    }

    fn source_state(&self, endpoint_id: &str) -> Arc<SourceState> {
        self.inner
            .lock()
            .sources
            .entry(endpoint_id.to_string())
            .or_insert_with(|| {
                Arc::new(SourceState {
                    shared: Mutex::new(SourceShared::default()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    fn sink_state(&self, endpoint_id: &str) -> Arc<SinkState> {
        self.inner
            .lock()
            .sinks
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Arc::new(SinkState { shared: Mutex::new(SinkShared::default()) }))
            .clone()
    }

    fn queue_state(&self, endpoint_id: &str) -> Arc<QueueState> {
        self.inner
            .lock()
            .queues
            .entry(endpoint_id.to_string())
            .or_insert_with(|| {
                Arc::new(QueueState {
                    shared: Mutex::new(QueueShared::default()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

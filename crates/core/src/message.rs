// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pooled message carrier.
//!
//! A [`Message`] is the mutable unit flowing source → engine → sinks. Messages
//! are recycled through a process-wide pool: sources acquire, the engine owns
//! the in-flight copy, and dropping the [`PooledMessage`] guard returns the
//! allocation to the pool. Because release is the guard's drop, a message has
//! exactly one logical holder at a time and double release is unrepresentable
//! in safe code; the pool additionally debug-asserts against duplicate
//! returns.

use crate::define_name_id;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

define_name_id! {
    /// Identifier assigned by the source adapter when a message is produced.
    pub struct MessageId("msg-");
}

/// Operation type carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Create,
    Update,
    Delete,
    Snapshot,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Snapshot => "snapshot",
        }
    }
}

/// Mutable carrier of payload + metadata + operation type.
#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub operation: Operation,
    /// Table or topic the message originated from.
    pub topic: String,
    /// Raw payload bytes as read from the source.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    /// Structured view of the payload, mutated by transformation nodes.
    pub data: serde_json::Map<String, serde_json::Value>,
    /// String metadata attached by the engine (idempotency keys, origin tags).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Monotonically-assignable source offset.
    pub offset: u64,
}

impl Message {
    fn blank() -> Self {
        Self {
            id: MessageId::new(""),
            operation: Operation::Create,
            topic: String::new(),
            payload: Vec::new(),
            data: serde_json::Map::new(),
            metadata: HashMap::new(),
            offset: 0,
        }
    }

    /// Zero payload, data, and metadata; reset operation to create.
    fn reset(&mut self) {
        self.id = MessageId::new("");
        self.operation = Operation::Create;
        self.topic.clear();
        self.payload.clear();
        self.data.clear();
        self.metadata.clear();
        self.offset = 0;
    }

    /// Convenience accessor for a top-level data field.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.get(name)
    }
}

const LOCAL_CACHE_LIMIT: usize = 32;
const SHARED_POOL_LIMIT: usize = 1024;

thread_local! {
    static LOCAL_CACHE: RefCell<Vec<Box<Message>>> = const { RefCell::new(Vec::new()) };
}

/// Process-wide message pool: per-thread caches with a shared fallback.
pub struct MessagePool {
    shared: Mutex<Vec<Box<Message>>>,
    acquired: AtomicU64,
    released: AtomicU64,
    allocated: AtomicU64,
}

/// Pool activity counters, exposed for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub allocated: u64,
}

static POOL: OnceLock<MessagePool> = OnceLock::new();

/// The process-wide message pool.
pub fn pool() -> &'static MessagePool {
    POOL.get_or_init(|| MessagePool {
        shared: Mutex::new(Vec::new()),
        acquired: AtomicU64::new(0),
        released: AtomicU64::new(0),
        allocated: AtomicU64::new(0),
    })
}

impl MessagePool {
    /// Take a zeroed message out of the pool, allocating when both the
    /// thread-local cache and the shared free list are empty.
    pub fn acquire(&'static self) -> PooledMessage {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let recycled = LOCAL_CACHE
            .with(|cache| cache.borrow_mut().pop())
            .or_else(|| self.shared.lock().pop());
        let mut inner = match recycled {
            Some(boxed) => boxed,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                Box::new(Message::blank())
            }
        };
        inner.reset();
        PooledMessage { inner: Some(inner) }
    }

    fn release(&'static self, boxed: Box<Message>) {
        self.released.fetch_add(1, Ordering::Relaxed);
        let overflow = LOCAL_CACHE.with(|cache| {
            let mut cache = cache.borrow_mut();
            if cache.len() < LOCAL_CACHE_LIMIT {
                cache.push(boxed);
                None
            } else {
                Some(boxed)
            }
        });
        if let Some(boxed) = overflow {
            let mut shared = self.shared.lock();
            debug_assert!(
                !shared.iter().any(|m| std::ptr::eq::<Message>(&**m, &*boxed)),
                "message released twice"
            );
            if shared.len() < SHARED_POOL_LIMIT {
                shared.push(boxed);
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
        }
    }

    /// Drop the shared free list and zero the counters.
    ///
    /// Test hook only; thread-local caches repopulate naturally.
    #[cfg(any(test, feature = "test-support"))]
    pub fn reset(&self) {
        self.shared.lock().clear();
        self.acquired.store(0, Ordering::Relaxed);
        self.released.store(0, Ordering::Relaxed);
        self.allocated.store(0, Ordering::Relaxed);
    }
}

/// Owning guard over a pooled [`Message`].
///
/// Moving the guard moves ownership of the message; dropping it on any
/// terminal path releases the allocation back to the pool.
pub struct PooledMessage {
    inner: Option<Box<Message>>,
}

impl PooledMessage {
    /// Acquire a fresh message and stamp it with a generated id.
    pub fn new() -> Self {
        let mut msg = pool().acquire();
        msg.id = MessageId::generate();
        msg
    }

    /// Deep copy for fan-out; the clone is released independently.
    pub fn deep_clone(&self) -> Self {
        let mut copy = pool().acquire();
        let src = self.message();
        let dst = copy.message_mut();
        dst.id = src.id.clone();
        dst.operation = src.operation;
        dst.topic.clone_from(&src.topic);
        dst.payload.clone_from(&src.payload);
        dst.data.clone_from(&src.data);
        dst.metadata.clone_from(&src.metadata);
        dst.offset = src.offset;
        copy
    }

    fn message(&self) -> &Message {
        match &self.inner {
            Some(boxed) => boxed,
            // Invariant: inner is only None after drop.
            None => unreachable!("pooled message used after release"),
        }
    }

    fn message_mut(&mut self) -> &mut Message {
        match &mut self.inner {
            Some(boxed) => boxed,
            None => unreachable!("pooled message used after release"),
        }
    }
}

impl Default for PooledMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for PooledMessage {
    type Target = Message;

    fn deref(&self) -> &Message {
        self.message()
    }
}

impl DerefMut for PooledMessage {
    fn deref_mut(&mut self) -> &mut Message {
        self.message_mut()
    }
}

impl Drop for PooledMessage {
    fn drop(&mut self) {
        if let Some(boxed) = self.inner.take() {
            pool().release(boxed);
        }
    }
}

impl std::fmt::Debug for PooledMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.message().fmt(f)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source capability set.

use crate::error::AdapterResult;
use async_trait::async_trait;
use hermod_core::{MessageId, PooledMessage};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// A stream of messages with a durable cursor.
///
/// `read` must surface back-pressure by blocking, never by dropping, and must
/// observe cancellation within a bounded time. `ack` durably advances the
/// cursor and is idempotent for the same message id.
#[async_trait]
pub trait Source: Send + Sync {
    async fn open(&mut self) -> AdapterResult<()>;
    async fn close(&mut self) -> AdapterResult<()>;
    async fn ping(&self) -> AdapterResult<()>;

    /// Next message, `None` on end of stream. Blocks until a message is
    /// available or the token is cancelled (then [`crate::AdapterError::Closed`]).
    ///
    /// Must be cancel-safe: the engine races this future against its control
    /// channels, and dropping it mid-wait must not lose a message.
    async fn read(&mut self, cancel: &CancellationToken) -> AdapterResult<Option<PooledMessage>>;

    /// Durable cursor advancement for the given message.
    async fn ack(&mut self, message_id: MessageId, offset: u64) -> AdapterResult<()>;

    /// Request an initial snapshot of the given tables before the change
    /// stream. Optional capability.
    async fn snapshot(&mut self, _tables: &[String]) -> AdapterResult<()> {
        Err(crate::AdapterError::Unsupported("snapshot"))
    }

    /// Restart-safe position, as an opaque string map.
    fn state(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn set_state(&mut self, _state: HashMap<String, String>) {}

    /// Reposition the cursor, bypassing any persisted position. Rebuild
    /// support; optional capability.
    fn seek(&mut self, _offset: u64) -> AdapterResult<()> {
        Err(crate::AdapterError::Unsupported("seek"))
    }
}

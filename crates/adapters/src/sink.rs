// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sink capability set.

use crate::error::AdapterResult;
use crate::source::Source;
use async_trait::async_trait;
use hermod_core::Message;

/// A delivery target.
///
/// `write` must honor cancellation (the engine bounds it with the workflow's
/// write timeout) and may be called from concurrent deliveries when the
/// workflow runs with `max_inflight > 1`.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn open(&mut self) -> AdapterResult<()>;
    async fn close(&mut self) -> AdapterResult<()>;
    async fn ping(&self) -> AdapterResult<()>;

    async fn write(&mut self, message: &Message) -> AdapterResult<()>;

    /// Batched write; the default delegates to `write` per message.
    async fn write_batch(&mut self, messages: &[&Message]) -> AdapterResult<()> {
        for message in messages {
            self.write(message).await?;
        }
        Ok(())
    }

    /// Enumerate the tables or topics behind this sink. Optional capability
    /// used by the control plane's discovery UI.
    async fn discover(&self) -> AdapterResult<Vec<String>> {
        Err(crate::AdapterError::Unsupported("discover"))
    }

    /// Sample stored rows from a named table. Optional capability.
    async fn sample(&self, _table: &str, _limit: usize) -> AdapterResult<Vec<serde_json::Value>> {
        Err(crate::AdapterError::Unsupported("sample"))
    }
}

/// The DLQ contract: a sink the engine can later drain as a source.
pub trait ReplayQueue: Source + Sink {}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority source: drain the DLQ ahead of the primary source.
//!
//! Wraps the primary source together with a separately-built DLQ-as-source
//! instance, so the adapter graph stays acyclic: the wrapper owns the replay
//! view, and no adapter ever points back at the engine.

use crate::error::EngineResult;
use hermod_adapters::{AdapterResult, ReplayQueue, Source};
use hermod_core::{MessageId, PooledMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Metadata key marking which stream a message came from.
pub const ORIGIN_KEY: &str = "hermod.origin";
pub const ORIGIN_DLQ: &str = "dlq";
pub const ORIGIN_PRIMARY: &str = "primary";

pub struct PrioritySource {
    primary: Box<dyn Source>,
    dlq: Box<dyn ReplayQueue>,
    /// Offsets of in-flight DLQ reads, so acks route to the right stream.
    dlq_inflight: HashMap<MessageId, u64>,
}

impl PrioritySource {
    pub fn new(primary: Box<dyn Source>, dlq: Box<dyn ReplayQueue>) -> Self {
        Self { primary, dlq, dlq_inflight: HashMap::new() }
    }

    pub fn into_inner(self) -> (Box<dyn Source>, Box<dyn ReplayQueue>) {
        (self.primary, self.dlq)
    }
}

#[async_trait]
impl Source for PrioritySource {
    async fn open(&mut self) -> AdapterResult<()> {
        Source::open(&mut *self.dlq).await?;
        self.primary.open().await
    }

    async fn close(&mut self) -> AdapterResult<()> {
        // Reverse of open.
        self.primary.close().await?;
        Source::close(&mut *self.dlq).await
    }

    async fn ping(&self) -> AdapterResult<()> {
        self.primary.ping().await
    }

    /// On each read, the DLQ is drained to empty before the primary source
    /// is consulted.
    async fn read(&mut self, cancel: &CancellationToken) -> AdapterResult<Option<PooledMessage>> {
        if let Some(mut replayed) = Source::read(&mut *self.dlq, cancel).await? {
            self.dlq_inflight.insert(replayed.id.clone(), replayed.offset);
            replayed
                .metadata
                .insert(ORIGIN_KEY.to_string(), ORIGIN_DLQ.to_string());
            return Ok(Some(replayed));
        }
        match self.primary.read(cancel).await? {
            Some(mut msg) => {
                msg.metadata
                    .insert(ORIGIN_KEY.to_string(), ORIGIN_PRIMARY.to_string());
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    async fn ack(&mut self, message_id: MessageId, offset: u64) -> AdapterResult<()> {
        if let Some(dlq_offset) = self.dlq_inflight.remove(&message_id) {
            return Source::ack(&mut *self.dlq, message_id, dlq_offset).await;
        }
        self.primary.ack(message_id, offset).await
    }

    fn state(&self) -> HashMap<String, String> {
        self.primary.state()
    }

    fn set_state(&mut self, state: HashMap<String, String>) {
        self.primary.set_state(state);
    }

    fn seek(&mut self, offset: u64) -> AdapterResult<()> {
        self.primary.seek(offset)
    }
}

/// Helper used by the engine's start sequence.
pub fn wrap_if_prioritized(
    prioritize: bool,
    primary: Box<dyn Source>,
    dlq: Option<Box<dyn ReplayQueue>>,
) -> EngineResult<Box<dyn Source>> {
    match (prioritize, dlq) {
        (true, Some(dlq)) => Ok(Box::new(PrioritySource::new(primary, dlq))),
        (true, None) => Err(crate::error::EngineError::Config(
            "prioritize_dlq is set but no sink declares a DLQ".to_string(),
        )),
        (false, _) => Ok(primary),
    }
}

#[cfg(test)]
#[path = "priority_tests.rs"]
mod tests;

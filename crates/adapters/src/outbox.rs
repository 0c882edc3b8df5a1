// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbox sink: transactional hand-off through the metadata store.
//!
//! Instead of delivering directly, writes are staged as pending
//! [`OutboxItem`]s; a downstream transport (out of scope here) marks them
//! delivered or failed. Registered under the `outbox` kind.

use crate::error::AdapterResult;
use crate::registry::AdapterRegistry;
use crate::sink::Sink;
use async_trait::async_trait;
use hermod_core::{Clock, Message, OutboxItem, SystemClock};
use hermod_store::MetadataStore;
use std::sync::Arc;

pub struct OutboxSink {
    store: Arc<dyn MetadataStore>,
    clock: SystemClock,
}

impl OutboxSink {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store, clock: SystemClock }
    }
}

#[async_trait]
impl Sink for OutboxSink {
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
        let payload = if message.payload.is_empty() {
            serde_json::Value::Object(message.data.clone()).to_string().into_bytes()
        } else {
            message.payload.clone()
        };
        let item = OutboxItem::pending(payload, self.clock.epoch_ms());
        self.store.create_outbox_item(&item).await?;
        Ok(())
    }
}

/// Register the `outbox` sink kind against the given store.
pub fn register_outbox_sink(registry: &mut AdapterRegistry, store: Arc<dyn MetadataStore>) {
    registry.register_sink("outbox", move |_endpoint| {
        Ok(Box::new(OutboxSink::new(store.clone())) as Box<dyn Sink>)
    });
}

#[cfg(test)]
#[path = "outbox_tests.rs"]
mod tests;

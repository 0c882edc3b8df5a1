// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hermod-adapters: the source/sink boundary of the execution plane.
//!
//! Concrete transports (CDC connectors, queues, webhooks) live outside this
//! repository; the engine depends only on the [`Source`] and [`Sink`]
//! capability sets and resolves instances through the [`AdapterRegistry`].

mod error;
mod memory;
mod outbox;
mod registry;
mod sink;
mod source;

pub use error::{AdapterError, AdapterResult};
pub use memory::{
    MemoryHub, MemoryQueue, MemoryQueueHandle, MemorySink, MemorySinkHandle, MemorySource,
    MemorySourceHandle, RecordedMessage,
};
pub use outbox::{register_outbox_sink, OutboxSink};
pub use registry::AdapterRegistry;
pub use sink::{ReplayQueue, Sink};
pub use source::Source;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hermod-engine: the per-workflow runtime.
//!
//! An [`EngineRegistry`] holds one engine per running workflow. Each engine
//! drives source → node graph → sinks with at-least-once delivery: ordered
//! reads, bounded retries with DLQ fallback, approval suspensions, delayed
//! continuations, idempotency keys, and drain-on-shutdown. Live status, log,
//! and message events fan out on the [`LiveEventBus`].

mod bus;
mod engine;
mod error;
mod executor;
mod expr;
mod priority;
mod registry;
mod retry;
mod trace_buffer;

pub use bus::LiveEventBus;
pub use engine::{EngineHandle, EngineState, IDEMPOTENCY_KEY};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use executor::{ExecError, ExecOutcome, NodeExecutor, BRANCH_FALSE, BRANCH_TRUE};
pub use expr::{compare, get_path, render, set_path, ExprError};
pub use priority::{PrioritySource, ORIGIN_DLQ, ORIGIN_KEY, ORIGIN_PRIMARY};
pub use registry::{EngineRegistry, TestNodeResult};
pub use retry::Backoff;
pub use trace_buffer::TraceBuffer;

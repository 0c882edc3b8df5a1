// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hermod-core: entities and primitives shared across the Hermod execution plane.

pub mod approval;
pub mod clock;
pub mod endpoint;
pub mod id;
pub mod live;
pub mod message;
pub mod metrics;
pub mod outbox;
pub mod records;
pub mod trace;
pub mod workflow;
pub mod worker;

pub use approval::{Approval, ApprovalId, ApprovalStatus};
pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "test-support"))]
pub use clock::FakeClock;
pub use endpoint::{Endpoint, EndpointId};
pub use id::Vhost;
pub use live::{LiveMessage, StatusEvent};
pub use message::{Message, MessageId, Operation, PooledMessage};
pub use metrics::{counters, CounterSnapshot};
pub use outbox::{OutboxItem, OutboxItemId, OutboxStatus};
pub use records::{AuditEntry, LogEntry, LogLevel};
pub use trace::{TraceOutcome, TraceStep};
#[cfg(any(test, feature = "test-support"))]
pub use workflow::WorkflowBuilder;
pub use workflow::{
    CompareOp, Edge, FailurePolicy, Node, NodeId, NodeKind, TransformConfig, Workflow,
    WorkflowId, WorkflowSettings, WorkflowStatus, WorkflowValidationError,
};
pub use worker::{WorkerGuid, WorkerRecord, DEFAULT_WORKER_TTL_MS};

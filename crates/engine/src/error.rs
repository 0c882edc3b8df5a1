// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error types and classification.

use hermod_adapters::AdapterError;
use hermod_core::{ApprovalId, WorkflowId, WorkflowValidationError};
use hermod_store::StoreError;
use thiserror::Error;

/// Failures surfaced by the workflow engine and its registry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Idempotent-start sentinel: the workflow already has a running engine.
    #[error("workflow already running: {0}")]
    AlreadyRunning(WorkflowId),

    #[error("workflow not running: {0}")]
    NotRunning(WorkflowId),

    #[error("configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Validation(#[from] WorkflowValidationError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no DLQ configured for workflow {0}")]
    NoDlq(WorkflowId),

    #[error("approval {0} is not suspended on this engine")]
    UnknownApproval(ApprovalId),

    /// Delivery exhausted retries with no DLQ under the park policy.
    #[error("workflow parked: {0}")]
    Parked(String),

    #[error("engine stopped before the request completed")]
    EngineGone,

    #[error("cancelled")]
    Cancelled,

    /// Lease could not be re-acquired for a rebuild.
    #[error("lease conflict on workflow {0}")]
    LeaseConflict(WorkflowId),
}

/// The five kinds the execution plane distinguishes; policy hangs off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry with backoff; surfaces only as degraded readiness.
    Transient,
    /// Workflow enters Error; no retry.
    Configuration,
    /// Routed to the DLQ when present, else counted as dropped.
    Data,
    /// Recovered at the engine boundary; lease released.
    Fatal,
    /// Normal shutdown signal; drain, not error.
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Adapter(err) if err.is_transient() => ErrorKind::Transient,
            EngineError::Store(err) if err.is_transient() => ErrorKind::Transient,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::Parked(_) | EngineError::EngineGone => ErrorKind::Fatal,
            EngineError::AlreadyRunning(_)
            | EngineError::NotRunning(_)
            | EngineError::Config(_)
            | EngineError::Validation(_)
            | EngineError::Adapter(_)
            | EngineError::Store(_)
            | EngineError::NoDlq(_)
            | EngineError::UnknownApproval(_)
            | EngineError::LeaseConflict(_) => ErrorKind::Configuration,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

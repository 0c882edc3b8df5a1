// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter error kinds.

use thiserror::Error;

/// Failures surfaced by source and sink adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Unresolvable type discriminator or invalid endpoint configuration.
    /// Never retried; the workflow enters Error.
    #[error("adapter configuration: {0}")]
    Config(String),

    /// Transient connection or delivery failure; retried per policy.
    #[error("adapter connection: {0}")]
    Connection(String),

    /// The adapter was closed or the read was cancelled.
    #[error("adapter closed")]
    Closed,

    /// The named capability is not implemented by this adapter.
    #[error("{0} not supported by this adapter")]
    Unsupported(&'static str),

    #[error(transparent)]
    Store(#[from] hermod_store::StoreError),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Connection(_) => true,
            AdapterError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error kinds.

use thiserror::Error;

/// Failures surfaced by a metadata store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The write lost a conditional check (active workflow deleted, owner
    /// mismatch on a guarded update).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient backend failure; callers retry on the next tick.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Transient errors mean "no progress this tick", not workflow failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

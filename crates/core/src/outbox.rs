// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbox items for sinks that require transactional hand-off.

use crate::define_name_id;
use serde::{Deserialize, Serialize};

define_name_id! {
    /// Outbox item identifier.
    pub struct OutboxItemId("obx-");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Delivered,
    Failed,
}

/// A staged delivery awaiting pickup by the downstream transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: OutboxItemId,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    #[serde(default)]
    pub attempts: u32,
    pub created_at_ms: u64,
}

impl OutboxItem {
    pub fn pending(payload: Vec<u8>, created_at_ms: u64) -> Self {
        Self {
            id: OutboxItemId::generate(),
            payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at_ms,
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live event payloads published on the in-process bus.
//!
//! Three kinds flow to subscribers (websocket/SSE clients of the control
//! plane): status updates, log lines ([`crate::records::LogEntry`]), and
//! per-message live traces.

use crate::message::{MessageId, Operation};
use crate::workflow::{NodeId, WorkflowId, WorkflowStatus};
use serde::{Deserialize, Serialize};

/// A workflow status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub workflow_id: WorkflowId,
    pub status: WorkflowStatus,
    pub at_ms: u64,
    /// Human-readable context, e.g. the error that parked the workflow, or a
    /// degraded-state note while the engine keeps running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusEvent {
    pub fn new(workflow_id: WorkflowId, status: WorkflowStatus, at_ms: u64) -> Self {
        Self { workflow_id, status, at_ms, detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A message observed at a node, streamed to dashboard subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub workflow_id: WorkflowId,
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    pub topic: String,
    pub operation: Operation,
    pub offset: u64,
    pub at_ms: u64,
    /// Structured data snapshot at the time of observation.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,
}

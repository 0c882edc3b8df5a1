// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-node trace steps, appended by the engine and read-only thereafter.

use crate::message::MessageId;
use crate::workflow::{NodeId, WorkflowId};
use serde::{Deserialize, Serialize};

/// How a node disposed of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    /// Passed through on the default branch.
    Ok,
    /// Passed through on a named branch.
    Branch(String),
    /// Filter predicate false; message dropped.
    Dropped,
    /// Suspended awaiting approval.
    Suspended,
    /// Continuation scheduled by a delay node.
    Delayed,
    /// Sink write succeeded.
    Delivered,
    /// Delivery exhausted retries and went to the DLQ.
    DeadLettered,
    /// Node execution failed.
    Failed,
}

/// One step of a message's lineage through a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub workflow_id: WorkflowId,
    pub message_id: MessageId,
    pub node_id: NodeId,
    pub at_ms: u64,
    pub outcome: TraceOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceStep {
    pub fn new(
        workflow_id: WorkflowId,
        message_id: MessageId,
        node_id: NodeId,
        at_ms: u64,
        outcome: TraceOutcome,
    ) -> Self {
        Self { workflow_id, message_id, node_id, at_ms, outcome, error: None }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

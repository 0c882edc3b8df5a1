// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval gates.
//!
//! An approval node parks a message lineage and records a pending approval in
//! the store. The control plane resolves it with a branch name; the engine
//! then re-enters the node's continuation on that branch.

use crate::define_name_id;
use crate::message::MessageId;
use crate::workflow::{NodeId, WorkflowId};
use serde::{Deserialize, Serialize};

define_name_id! {
    /// Approval record identifier.
    pub struct ApprovalId("apr-");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Resolved { branch: String },
}

/// Pending or resolved approval record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub message_id: MessageId,
    pub created_at_ms: u64,
    pub status: ApprovalStatus,
}

impl Approval {
    pub fn pending(
        workflow_id: WorkflowId,
        node_id: NodeId,
        message_id: MessageId,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: ApprovalId::generate(),
            workflow_id,
            node_id,
            message_id,
            created_at_ms,
            status: ApprovalStatus::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

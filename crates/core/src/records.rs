// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log and audit records appended to the metadata store.

use crate::worker::WorkerGuid;
use crate::workflow::WorkflowId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Structured log line. The store stamps `timestamp` (RFC 3339) on append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at_ms: u64,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerGuid>,
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

impl LogEntry {
    pub fn new(at_ms: u64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at_ms,
            level,
            workflow_id: None,
            worker: None,
            message: message.into(),
            timestamp: String::new(),
        }
    }

    pub fn for_workflow(mut self, id: WorkflowId) -> Self {
        self.workflow_id = Some(id);
        self
    }

    pub fn from_worker(mut self, guid: WorkerGuid) -> Self {
        self.worker = Some(guid);
        self
    }
}

/// Append-only audit record. Schema beyond the append operation is the
/// control plane's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at_ms: u64,
    /// Worker GUID or control-plane principal.
    pub actor: String,
    pub action: String,
    pub subject: String,
    #[serde(default)]
    pub timestamp: String,
}

impl AuditEntry {
    pub fn new(
        at_ms: u64,
        actor: impl Into<String>,
        action: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            at_ms,
            actor: actor.into(),
            action: action.into(),
            subject: subject.into(),
            timestamp: String::new(),
        }
    }
}

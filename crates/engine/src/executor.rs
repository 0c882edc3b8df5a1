// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Node executor: evaluates one non-terminal node against one message.
//!
//! Sinks and sources are the engine's business; everything in between runs
//! here. The executor owns the state of stateful nodes (currently the dedup
//! transformation); the engine seeds that state from the store at start and
//! flushes dirty state back before acking.

use crate::expr;
use hermod_core::{Node, NodeId, NodeKind, PooledMessage, TransformConfig};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Mapping keys address message data under this prefix.
const COLUMN_PREFIX: &str = "column.";

/// Branch labels emitted by condition nodes.
pub const BRANCH_TRUE: &str = "true";
pub const BRANCH_FALSE: &str = "false";

/// Executor failures. All of these are data errors: routed to the DLQ when
/// one is configured, otherwise counted and dropped.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("node {node}: {source}")]
    Expr {
        node: NodeId,
        #[source]
        source: expr::ExprError,
    },
    #[error("node {node}: field {field:?} is missing")]
    MissingField { node: NodeId, field: String },
    #[error("node {node}: executor does not handle {kind} nodes")]
    WrongKind { node: NodeId, kind: &'static str },
}

/// Result of evaluating a node.
#[derive(Debug)]
pub enum ExecOutcome {
    /// Continue on the labeled branch (label `""` is the default output).
    Emit(String, PooledMessage),
    /// Predicate false; the message is dropped, not an error.
    Drop,
    /// Approval gate: suspend this lineage until resolved.
    Suspend(PooledMessage),
    /// Delay node: re-enter the node's continuation after the duration.
    Delay { after_ms: u64, message: PooledMessage },
}

/// Persisted dedup window: insertion-ordered seen keys.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DedupWindow {
    keys: VecDeque<String>,
}

struct DedupState {
    window: DedupWindow,
    seen: HashSet<String>,
    capacity: usize,
    dirty: bool,
}

impl DedupState {
    fn new(capacity: usize) -> Self {
        Self { window: DedupWindow::default(), seen: HashSet::new(), capacity, dirty: false }
    }

    fn seed(&mut self, bytes: &[u8]) {
        if let Ok(window) = serde_json::from_slice::<DedupWindow>(bytes) {
            self.seen = window.keys.iter().cloned().collect();
            self.window = window;
        }
    }

    /// True when the key was already seen; records it otherwise.
    fn check_and_record(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return true;
        }
        if self.window.keys.len() == self.capacity {
            if let Some(evicted) = self.window.keys.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(key.clone());
        self.window.keys.push_back(key);
        self.dirty = true;
        false
    }

    fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(&self.window).unwrap_or_default()
    }
}

/// Evaluates interior nodes and owns stateful-node state.
pub struct NodeExecutor {
    dedup: HashMap<NodeId, DedupState>,
}

impl NodeExecutor {
    pub fn new() -> Self {
        Self { dedup: HashMap::new() }
    }

    /// Seed a stateful node from store bytes. No-op for stateless nodes.
    pub fn seed_state(&mut self, node: &Node, bytes: &[u8]) {
        if let NodeKind::Transformation(TransformConfig::Dedup { capacity, .. }) = &node.kind {
            let state = self
                .dedup
                .entry(node.id.clone())
                .or_insert_with(|| DedupState::new(*capacity));
            state.seed(bytes);
        }
    }

    /// Dirty state to flush, cleared by this call. Flushing must precede the
    /// source ack for the messages that dirtied it.
    pub fn take_dirty_state(&mut self) -> Vec<(NodeId, Vec<u8>)> {
        let mut dirty = Vec::new();
        for (node_id, state) in &mut self.dedup {
            if state.dirty {
                state.dirty = false;
                dirty.push((node_id.clone(), state.serialize()));
            }
        }
        dirty
    }

    /// Evaluate one interior node.
    pub fn execute(
        &mut self,
        node: &Node,
        mut message: PooledMessage,
    ) -> Result<ExecOutcome, ExecError> {
        match &node.kind {
            NodeKind::Transformation(TransformConfig::Mapping { map }) => {
                for (key, expression) in map {
                    let path = key.strip_prefix(COLUMN_PREFIX).unwrap_or(key);
                    let rendered = expr::render(expression, &message.data);
                    expr::set_path(&mut message.data, path, rendered);
                }
                Ok(ExecOutcome::Emit(String::new(), message))
            }

            NodeKind::Transformation(TransformConfig::FilterData { field, op, value }) => {
                let left = expr::get_path(&message.data, field)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                let keep = expr::compare(*op, &left, value)
                    .map_err(|source| ExecError::Expr { node: node.id.clone(), source })?;
                if keep {
                    Ok(ExecOutcome::Emit(String::new(), message))
                } else {
                    Ok(ExecOutcome::Drop)
                }
            }

            NodeKind::Transformation(TransformConfig::Dedup { field, capacity }) => {
                let key = expr::get_path(&message.data, field)
                    .map(expr::stringify)
                    .ok_or_else(|| ExecError::MissingField {
                        node: node.id.clone(),
                        field: field.clone(),
                    })?;
                let state = self
                    .dedup
                    .entry(node.id.clone())
                    .or_insert_with(|| DedupState::new(*capacity));
                if state.check_and_record(key) {
                    Ok(ExecOutcome::Drop)
                } else {
                    Ok(ExecOutcome::Emit(String::new(), message))
                }
            }

            NodeKind::Condition { field, op, value } => {
                let left = expr::get_path(&message.data, field)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                let truthy = expr::compare(*op, &left, value)
                    .map_err(|source| ExecError::Expr { node: node.id.clone(), source })?;
                let branch = if truthy { BRANCH_TRUE } else { BRANCH_FALSE };
                Ok(ExecOutcome::Emit(branch.to_string(), message))
            }

            NodeKind::Router { field } => {
                let branch = expr::get_path(&message.data, field)
                    .map(expr::stringify)
                    .unwrap_or_default();
                Ok(ExecOutcome::Emit(branch, message))
            }

            NodeKind::Approval => Ok(ExecOutcome::Suspend(message)),

            NodeKind::Delay { duration_ms } => {
                Ok(ExecOutcome::Delay { after_ms: *duration_ms, message })
            }

            NodeKind::Source { .. } | NodeKind::Sink { .. } => Err(ExecError::WrongKind {
                node: node.id.clone(),
                kind: node.kind.type_name(),
            }),
        }
    }
}

impl Default for NodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;

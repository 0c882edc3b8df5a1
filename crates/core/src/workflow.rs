// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow and node definitions.
//!
//! A workflow is a persisted DAG: one source node, interior
//! transformation/condition/router/approval/delay nodes, and one or more sink
//! terminals. The control plane writes these records; the execution plane
//! only reads them (apart from status and lease fields).

use crate::define_name_id;
use crate::endpoint::EndpointId;
use crate::id::Vhost;
use crate::worker::WorkerGuid;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

define_name_id! {
    /// Workflow identifier, assigned by the control plane.
    pub struct WorkflowId;
}

define_name_id! {
    /// Node identifier, unique within one workflow.
    pub struct NodeId;
}

/// Reported workflow status.
///
/// `active` on [`Workflow`] is the desired state; this is what the worker
/// actually observed and reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Active,
    #[default]
    Stopped,
    Parked,
    Error,
    Draining,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Stopped => "stopped",
            WorkflowStatus::Parked => "parked",
            WorkflowStatus::Error => "error",
            WorkflowStatus::Draining => "draining",
        }
    }
}

/// What to do when delivery exhausts retries and no DLQ is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Park the workflow and surface an error.
    #[default]
    Park,
    /// Drop the message and keep going.
    Drop,
}

/// Comparison operator used by filters, conditions, and routers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "in")]
    In,
}

/// Transformation node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    /// Applies a `{column.<dotted.path>: <expression>}` template over message
    /// data. Missing intermediates are created on write.
    Mapping { map: IndexMap<String, String> },
    /// Drops the message when the predicate is false.
    FilterData {
        field: String,
        op: CompareOp,
        value: serde_json::Value,
    },
    /// Stateful deduplication on a key field; the seen-key window is
    /// persisted as node state so restarts do not re-admit duplicates.
    Dedup {
        field: String,
        #[serde(default = "default_dedup_capacity")]
        capacity: usize,
    },
}

fn default_dedup_capacity() -> usize {
    1024
}

/// Node behavior, a closed variant set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Source {
        endpoint: EndpointId,
    },
    Sink {
        endpoint: EndpointId,
    },
    Transformation(TransformConfig),
    /// Boolean predicate; emits the input on branch `"true"` or `"false"`.
    Condition {
        field: String,
        op: CompareOp,
        value: serde_json::Value,
    },
    /// Suspends the message lineage until the control plane resolves the
    /// approval with a branch name.
    Approval,
    /// Emits the input on the branch named by the field's value.
    Router {
        field: String,
    },
    /// Re-enters the graph after the given delay.
    Delay {
        duration_ms: u64,
    },
}

impl NodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Source { .. } => "source",
            NodeKind::Sink { .. } => "sink",
            NodeKind::Transformation(_) => "transformation",
            NodeKind::Condition { .. } => "condition",
            NodeKind::Approval => "approval",
            NodeKind::Router { .. } => "router",
            NodeKind::Delay { .. } => "delay",
        }
    }
}

/// Outgoing edge. Branch `""` is the default output; conditions emit on
/// `"true"`/`"false"`, routers on computed labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub branch: String,
    pub to: NodeId,
}

impl Edge {
    pub fn to(node: impl Into<NodeId>) -> Self {
        Self { branch: String::new(), to: node.into() }
    }

    pub fn on(branch: impl Into<String>, node: impl Into<NodeId>) -> Self {
        Self { branch: branch.into(), to: node.into() }
    }
}

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        let id = id.into();
        Self { name: id.as_str().to_string(), id, kind, edges: Vec::new() }
    }

    pub fn with_edges(mut self, edges: Vec<Edge>) -> Self {
        self.edges = edges;
        self
    }

    /// Edges matching a branch label, in declaration order.
    pub fn edges_for<'a>(&'a self, branch: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.branch == branch)
    }
}

/// Per-workflow execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Messages in flight at once. 1 gives strict source-order delivery.
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Field whose value partitions ordering when `max_inflight > 1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    /// Drain the DLQ ahead of the primary source on every read.
    #[serde(default)]
    pub prioritize_dlq: bool,
    /// Attach idempotency keys for sinks that declare themselves idempotent.
    #[serde(default)]
    pub idempotency: bool,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    50
}
fn default_write_timeout_ms() -> u64 {
    5_000
}
fn default_drain_timeout_ms() -> u64 {
    10_000
}
fn default_max_inflight() -> usize {
    1
}
fn default_error_backoff_ms() -> u64 {
    30_000
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_inflight: default_max_inflight(),
            partition_key: None,
            prioritize_dlq: false,
            idempotency: false,
            failure_policy: FailurePolicy::default(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

/// A persisted workflow: desired state, reported state, node graph, lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub vhost: Vhost,
    /// Desired state, flipped by the control plane.
    #[serde(default)]
    pub active: bool,
    /// Reported state, mutated by the reconciler and the engine.
    #[serde(default)]
    pub status: WorkflowStatus,
    pub nodes: Vec<Node>,
    /// Worker currently leasing this workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<WorkerGuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_until_ms: Option<u64>,
    /// Explicit worker assignment; overrides hash sharding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker_guid: Option<WorkerGuid>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

/// Validation failures surfaced before an engine start.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowValidationError {
    #[error("workflow {0} has no source node")]
    MissingSource(WorkflowId),
    #[error("workflow {0} has {1} source nodes, expected exactly one")]
    MultipleSources(WorkflowId, usize),
    #[error("workflow {0}: edge references unknown node {1}")]
    DanglingEdge(WorkflowId, NodeId),
    #[error("workflow {0} has no sink node")]
    MissingSink(WorkflowId),
}

impl Workflow {
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// The single source terminus of the graph.
    pub fn source_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| matches!(n.kind, NodeKind::Source { .. }))
    }

    pub fn sink_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| matches!(n.kind, NodeKind::Sink { .. }))
    }

    /// True while the lease grants exclusive ownership.
    pub fn has_valid_lease(&self, now_ms: u64) -> bool {
        self.owner_id.is_some() && self.lease_until_ms.is_some_and(|until| until > now_ms)
    }

    /// Structural checks performed before an engine start. Resolution of
    /// endpoint references happens later, against the registry.
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        let sources = self
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Source { .. }))
            .count();
        if sources == 0 {
            return Err(WorkflowValidationError::MissingSource(self.id.clone()));
        }
        if sources > 1 {
            return Err(WorkflowValidationError::MultipleSources(self.id.clone(), sources));
        }
        if self.sink_nodes().next().is_none() {
            return Err(WorkflowValidationError::MissingSink(self.id.clone()));
        }
        for node in &self.nodes {
            for edge in &node.edges {
                if self.node(&edge.to).is_none() {
                    return Err(WorkflowValidationError::DanglingEdge(
                        self.id.clone(),
                        edge.to.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Test builder for workflows.
#[cfg(any(test, feature = "test-support"))]
pub struct WorkflowBuilder {
    workflow: Workflow,
}

#[cfg(any(test, feature = "test-support"))]
impl WorkflowBuilder {
    pub fn new(id: impl Into<WorkflowId>) -> Self {
        let id = id.into();
        Self {
            workflow: Workflow {
                name: id.as_str().to_string(),
                id,
                vhost: Vhost::default(),
                active: true,
                status: WorkflowStatus::Stopped,
                nodes: Vec::new(),
                owner_id: None,
                lease_until_ms: None,
                assigned_worker_guid: None,
                settings: WorkflowSettings::default(),
            },
        }
    }

    pub fn node(mut self, node: Node) -> Self {
        self.workflow.nodes.push(node);
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.workflow.active = active;
        self
    }

    pub fn assigned_to(mut self, guid: WorkerGuid) -> Self {
        self.workflow.assigned_worker_guid = Some(guid);
        self
    }

    pub fn settings(mut self, settings: WorkflowSettings) -> Self {
        self.workflow.settings = settings;
        self
    }

    pub fn tweak(mut self, f: impl FnOnce(&mut WorkflowSettings)) -> Self {
        f(&mut self.workflow.settings);
        self
    }

    /// A linear source → sink workflow over the given endpoints.
    pub fn source_to_sink(
        id: impl Into<WorkflowId>,
        source: impl Into<EndpointId>,
        sink: impl Into<EndpointId>,
    ) -> Self {
        Self::new(id)
            .node(
                Node::new("src", NodeKind::Source { endpoint: source.into() })
                    .with_edges(vec![Edge::to("out")]),
            )
            .node(Node::new("out", NodeKind::Sink { endpoint: sink.into() }))
    }

    pub fn build(self) -> Workflow {
        self.workflow
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;

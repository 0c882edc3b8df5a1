// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hermod-store: the metadata store boundary.
//!
//! The store is the sole source of truth for workflows, workers, leases,
//! traces, node state, approvals, the outbox, and logs. Any backend that
//! honors the [`MetadataStore`] contracts, in particular the atomic
//! compare-and-set lease operations, can stand behind the execution plane.
//! [`MemoryStore`] is the reference backend and the test substrate.

mod error;
mod memory;
#[cfg(any(test, feature = "test-support"))]
mod test_support;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
#[cfg(any(test, feature = "test-support"))]
pub use test_support::FlakyStore;

use async_trait::async_trait;
use hermod_core::{
    Approval, ApprovalId, AuditEntry, Endpoint, EndpointId, LogEntry, MessageId, NodeId,
    OutboxItem, OutboxStatus, TraceStep, Vhost, WorkerGuid, WorkerRecord, Workflow, WorkflowId,
    WorkflowStatus,
};
use std::time::Duration;

/// Default deadline for a single store call.
pub const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Workflow listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    /// Only workflows whose desired state is active.
    pub active_only: bool,
    pub vhost: Option<Vhost>,
}

impl WorkflowFilter {
    pub fn active() -> Self {
        Self { active_only: true, vhost: None }
    }

    pub fn matches(&self, wf: &Workflow) -> bool {
        if self.active_only && !wf.active {
            return false;
        }
        if let Some(vhost) = &self.vhost {
            if &wf.vhost != vhost {
                return false;
            }
        }
        true
    }
}

/// Worker listing filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerFilter {
    /// Only workers seen within the given window.
    pub seen_within_ms: Option<u64>,
}

/// The capability set the execution plane requires from a metadata backend.
///
/// Every method is cancel-safe: callers race these futures against a
/// cancellation token and bound them with [`STORE_CALL_TIMEOUT`]. Transient
/// failures surface as [`StoreError::Unavailable`] and are retried by the
/// caller on its next tick.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    // -- workflows --

    /// Ordered snapshot; may be stale but is internally consistent.
    async fn list_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<Workflow>>;
    async fn get_workflow(&self, id: &WorkflowId) -> StoreResult<Workflow>;
    /// Create or replace. Lease fields are ignored; they move only through
    /// the lease operations below.
    async fn put_workflow(&self, workflow: &Workflow) -> StoreResult<()>;
    async fn update_workflow_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
    ) -> StoreResult<()>;
    /// Deletion requires the workflow to be inactive.
    async fn delete_workflow(&self, id: &WorkflowId) -> StoreResult<()>;

    // -- endpoints --

    async fn list_endpoints(&self) -> StoreResult<Vec<Endpoint>>;
    async fn get_endpoint(&self, id: &EndpointId) -> StoreResult<Endpoint>;
    async fn put_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()>;

    // -- workers --

    async fn list_workers(&self, filter: &WorkerFilter) -> StoreResult<Vec<WorkerRecord>>;
    async fn register_worker(&self, worker: &WorkerRecord) -> StoreResult<()>;
    /// Sets `last_seen` to the store's wall clock at call time.
    async fn update_worker_heartbeat(
        &self,
        guid: &WorkerGuid,
        cpu_percent: f32,
        mem_percent: f32,
    ) -> StoreResult<()>;

    // -- leases --
    //
    // All three are atomic conditional writes; see each method's contract.

    /// Returns true iff no valid lease exists, the existing lease is owned by
    /// `owner`, or the existing lease has expired. On success sets
    /// `(owner_id, lease_until = now + ttl)`.
    async fn acquire_workflow_lease(
        &self,
        id: &WorkflowId,
        owner: &WorkerGuid,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Returns true iff the current owner matches `owner` and the lease has
    /// not yet expired; extends `lease_until` on success.
    async fn renew_workflow_lease(
        &self,
        id: &WorkflowId,
        owner: &WorkerGuid,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Clears the lease. No-op when the owner doesn't match.
    async fn release_workflow_lease(&self, id: &WorkflowId, owner: &WorkerGuid)
        -> StoreResult<()>;

    // -- traces --

    async fn append_trace_steps(&self, steps: &[TraceStep]) -> StoreResult<()>;
    async fn list_trace_steps(
        &self,
        workflow_id: &WorkflowId,
        message_id: Option<&MessageId>,
    ) -> StoreResult<Vec<TraceStep>>;
    async fn purge_trace_steps(
        &self,
        workflow_id: &WorkflowId,
        older_than_ms: u64,
    ) -> StoreResult<u64>;

    // -- node state --

    async fn get_node_state(
        &self,
        workflow_id: &WorkflowId,
        node_id: &NodeId,
    ) -> StoreResult<Option<Vec<u8>>>;
    async fn put_node_state(
        &self,
        workflow_id: &WorkflowId,
        node_id: &NodeId,
        state: &[u8],
    ) -> StoreResult<()>;

    // -- approvals --

    async fn create_approval(&self, approval: &Approval) -> StoreResult<()>;
    async fn get_approval(&self, id: &ApprovalId) -> StoreResult<Approval>;
    /// Marks the approval resolved on the given branch. Fails with
    /// [`StoreError::Conflict`] when already resolved.
    async fn resolve_approval(&self, id: &ApprovalId, branch: &str) -> StoreResult<Approval>;
    async fn list_approvals(&self, workflow_id: &WorkflowId) -> StoreResult<Vec<Approval>>;

    // -- outbox --

    async fn create_outbox_item(&self, item: &OutboxItem) -> StoreResult<()>;
    async fn list_outbox_items(&self, status: Option<OutboxStatus>)
        -> StoreResult<Vec<OutboxItem>>;
    async fn update_outbox_item(&self, item: &OutboxItem) -> StoreResult<()>;
    async fn purge_outbox(&self, older_than_ms: u64) -> StoreResult<u64>;

    // -- logs and audit --

    async fn append_log(&self, entry: &LogEntry) -> StoreResult<()>;
    async fn list_logs(&self, workflow_id: Option<&WorkflowId>, limit: usize)
        -> StoreResult<Vec<LogEntry>>;
    async fn purge_logs(&self, older_than_ms: u64) -> StoreResult<u64>;
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()>;
}

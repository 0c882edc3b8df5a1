// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store wrapper that injects transient failures, for reconciler and engine
//! degradation tests.

use crate::error::{StoreError, StoreResult};
use crate::{MetadataStore, WorkerFilter, WorkflowFilter};
use async_trait::async_trait;
use hermod_core::{
    Approval, ApprovalId, AuditEntry, Endpoint, EndpointId, LogEntry, MessageId, NodeId,
    OutboxItem, OutboxStatus, TraceStep, WorkerGuid, WorkerRecord, Workflow, WorkflowId,
    WorkflowStatus,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails the first `fail_count` calls (any operation) with
/// [`StoreError::Unavailable`], then delegates to the inner store.
pub struct FlakyStore<S> {
    inner: Arc<S>,
    remaining_failures: AtomicU64,
    failures_served: AtomicU64,
}

impl<S: MetadataStore> FlakyStore<S> {
    pub fn failing(inner: Arc<S>, fail_count: u64) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU64::new(fail_count),
            failures_served: AtomicU64::new(0),
        }
    }

    /// How many calls have been failed so far.
    pub fn failures_served(&self) -> u64 {
        self.failures_served.load(Ordering::Relaxed)
    }

    fn gate(&self) -> StoreResult<()> {
        let remaining = self.remaining_failures.load(Ordering::Relaxed);
        if remaining > 0
            && self
                .remaining_failures
                .compare_exchange(remaining, remaining - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.failures_served.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: MetadataStore> MetadataStore for FlakyStore<S> {
    async fn list_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<Workflow>> {
        self.gate()?;
        self.inner.list_workflows(filter).await
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StoreResult<Workflow> {
        self.gate()?;
        self.inner.get_workflow(id).await
    }

    async fn put_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        self.gate()?;
        self.inner.put_workflow(workflow).await
    }

    async fn update_workflow_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
    ) -> StoreResult<()> {
        self.gate()?;
        self.inner.update_workflow_status(id, status).await
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> StoreResult<()> {
        self.gate()?;
        self.inner.delete_workflow(id).await
    }

    async fn list_endpoints(&self) -> StoreResult<Vec<Endpoint>> {
        self.gate()?;
        self.inner.list_endpoints().await
    }

    async fn get_endpoint(&self, id: &EndpointId) -> StoreResult<Endpoint> {
        self.gate()?;
        self.inner.get_endpoint(id).await
    }

    async fn put_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()> {
        self.gate()?;
        self.inner.put_endpoint(endpoint).await
    }

    async fn list_workers(&self, filter: &WorkerFilter) -> StoreResult<Vec<WorkerRecord>> {
        self.gate()?;
        self.inner.list_workers(filter).await
    }

    async fn register_worker(&self, worker: &WorkerRecord) -> StoreResult<()> {
        self.gate()?;
        self.inner.register_worker(worker).await
    }

    async fn update_worker_heartbeat(
        &self,
        guid: &WorkerGuid,
        cpu_percent: f32,
        mem_percent: f32,
    ) -> StoreResult<()> {
        self.gate()?;
        self.inner.update_worker_heartbeat(guid, cpu_percent, mem_percent).await
    }

    async fn acquire_workflow_lease(
        &self,
        id: &WorkflowId,
        owner: &WorkerGuid,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.gate()?;
        self.inner.acquire_workflow_lease(id, owner, ttl).await
    }

    async fn renew_workflow_lease(
        &self,
        id: &WorkflowId,
        owner: &WorkerGuid,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.gate()?;
        self.inner.renew_workflow_lease(id, owner, ttl).await
    }

    async fn release_workflow_lease(
        &self,
        id: &WorkflowId,
        owner: &WorkerGuid,
    ) -> StoreResult<()> {
        self.gate()?;
        self.inner.release_workflow_lease(id, owner).await
    }

    async fn append_trace_steps(&self, steps: &[TraceStep]) -> StoreResult<()> {
        self.gate()?;
        self.inner.append_trace_steps(steps).await
    }

    async fn list_trace_steps(
        &self,
        workflow_id: &WorkflowId,
        message_id: Option<&MessageId>,
    ) -> StoreResult<Vec<TraceStep>> {
        self.gate()?;
        self.inner.list_trace_steps(workflow_id, message_id).await
    }

    async fn purge_trace_steps(
        &self,
        workflow_id: &WorkflowId,
        older_than_ms: u64,
    ) -> StoreResult<u64> {
        self.gate()?;
        self.inner.purge_trace_steps(workflow_id, older_than_ms).await
    }

    async fn get_node_state(
        &self,
        workflow_id: &WorkflowId,
        node_id: &NodeId,
    ) -> StoreResult<Option<Vec<u8>>> {
        self.gate()?;
        self.inner.get_node_state(workflow_id, node_id).await
    }

    async fn put_node_state(
        &self,
        workflow_id: &WorkflowId,
        node_id: &NodeId,
        state: &[u8],
    ) -> StoreResult<()> {
        self.gate()?;
        self.inner.put_node_state(workflow_id, node_id, state).await
    }

    async fn create_approval(&self, approval: &Approval) -> StoreResult<()> {
        self.gate()?;
        self.inner.create_approval(approval).await
    }

    async fn get_approval(&self, id: &ApprovalId) -> StoreResult<Approval> {
        self.gate()?;
        self.inner.get_approval(id).await
    }

    async fn resolve_approval(&self, id: &ApprovalId, branch: &str) -> StoreResult<Approval> {
        self.gate()?;
        self.inner.resolve_approval(id, branch).await
    }

    async fn list_approvals(&self, workflow_id: &WorkflowId) -> StoreResult<Vec<Approval>> {
        self.gate()?;
        self.inner.list_approvals(workflow_id).await
    }

    async fn create_outbox_item(&self, item: &OutboxItem) -> StoreResult<()> {
        self.gate()?;
        self.inner.create_outbox_item(item).await
    }

    async fn list_outbox_items(
        &self,
        status: Option<OutboxStatus>,
    ) -> StoreResult<Vec<OutboxItem>> {
        self.gate()?;
        self.inner.list_outbox_items(status).await
    }

    async fn update_outbox_item(&self, item: &OutboxItem) -> StoreResult<()> {
        self.gate()?;
        self.inner.update_outbox_item(item).await
    }

    async fn purge_outbox(&self, older_than_ms: u64) -> StoreResult<u64> {
        self.gate()?;
        self.inner.purge_outbox(older_than_ms).await
    }

    async fn append_log(&self, entry: &LogEntry) -> StoreResult<()> {
        self.gate()?;
        self.inner.append_log(entry).await
    }

    async fn list_logs(
        &self,
        workflow_id: Option<&WorkflowId>,
        limit: usize,
    ) -> StoreResult<Vec<LogEntry>> {
        self.gate()?;
        self.inner.list_logs(workflow_id, limit).await
    }

    async fn purge_logs(&self, older_than_ms: u64) -> StoreResult<u64> {
        self.gate()?;
        self.inner.purge_logs(older_than_ms).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.gate()?;
        self.inner.append_audit(entry).await
    }
}

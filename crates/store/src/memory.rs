// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory reference backend.
//!
//! All tables sit behind a single mutex, so every lease operation is one
//! conditional write under one critical section, the strongest reading of
//! the compare-and-set contract. Generic over [`Clock`] so lease expiry and
//! heartbeat staleness are testable without sleeping.

use crate::error::{StoreError, StoreResult};
use crate::{MetadataStore, WorkerFilter, WorkflowFilter};
use async_trait::async_trait;
use hermod_core::{
    Approval, ApprovalId, ApprovalStatus, AuditEntry, Clock, Endpoint, EndpointId, LogEntry,
    MessageId, NodeId, OutboxItem, OutboxItemId, OutboxStatus, SystemClock, TraceStep,
    WorkerGuid, WorkerRecord, Workflow, WorkflowId, WorkflowStatus,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Default)]
struct Tables {
    workflows: HashMap<WorkflowId, Workflow>,
    endpoints: HashMap<EndpointId, Endpoint>,
    workers: HashMap<WorkerGuid, WorkerRecord>,
    traces: Vec<TraceStep>,
    node_state: HashMap<(WorkflowId, NodeId), Vec<u8>>,
    approvals: HashMap<ApprovalId, Approval>,
    outbox: HashMap<OutboxItemId, OutboxItem>,
    logs: Vec<LogEntry>,
    audit: Vec<AuditEntry>,
}

/// Reference store backend held entirely in process memory.
pub struct MemoryStore<C: Clock = SystemClock> {
    tables: Mutex<Tables>,
    clock: C,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { tables: Mutex::new(Tables::default()), clock }
    }

    fn rfc3339(&self, at_ms: u64) -> String {
        chrono::DateTime::from_timestamp_millis(at_ms as i64)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }
}

#[async_trait]
impl<C: Clock> MetadataStore for MemoryStore<C> {
    async fn list_workflows(&self, filter: &WorkflowFilter) -> StoreResult<Vec<Workflow>> {
        let tables = self.tables.lock();
        let mut workflows: Vec<Workflow> =
            tables.workflows.values().filter(|wf| filter.matches(wf)).cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workflows)
    }

    async fn get_workflow(&self, id: &WorkflowId) -> StoreResult<Workflow> {
        self.tables
            .lock()
            .workflows
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("workflow", id))
    }

    async fn put_workflow(&self, workflow: &Workflow) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let mut incoming = workflow.clone();
        // Lease fields move only through the lease operations.
        if let Some(existing) = tables.workflows.get(&workflow.id) {
            incoming.owner_id = existing.owner_id.clone();
            incoming.lease_until_ms = existing.lease_until_ms;
        } else {
            incoming.owner_id = None;
            incoming.lease_until_ms = None;
        }
        tables.workflows.insert(incoming.id.clone(), incoming);
        Ok(())
    }

    async fn update_workflow_status(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let wf = tables
            .workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("workflow", id))?;
        wf.status = status;
        Ok(())
    }

    async fn delete_workflow(&self, id: &WorkflowId) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        match tables.workflows.get(id) {
            None => Err(StoreError::not_found("workflow", id)),
            Some(wf) if wf.active => Err(StoreError::InvalidState(format!(
                "workflow {id} is active; deactivate before deleting"
            ))),
            Some(_) => {
                tables.workflows.remove(id);
                tables.node_state.retain(|(wf_id, _), _| wf_id != id);
                tables.traces.retain(|t| &t.workflow_id != id);
                Ok(())
            }
        }
    }

    async fn list_endpoints(&self) -> StoreResult<Vec<Endpoint>> {
        let tables = self.tables.lock();
        let mut endpoints: Vec<Endpoint> = tables.endpoints.values().cloned().collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(endpoints)
    }

    async fn get_endpoint(&self, id: &EndpointId) -> StoreResult<Endpoint> {
        self.tables
            .lock()
            .endpoints
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("endpoint", id))
    }

    async fn put_endpoint(&self, endpoint: &Endpoint) -> StoreResult<()> {
        self.tables.lock().endpoints.insert(endpoint.id.clone(), endpoint.clone());
        Ok(())
    }

    async fn list_workers(&self, filter: &WorkerFilter) -> StoreResult<Vec<WorkerRecord>> {
        let now_ms = self.clock.epoch_ms();
        let tables = self.tables.lock();
        let mut workers: Vec<WorkerRecord> = tables
            .workers
            .values()
            .filter(|w| match filter.seen_within_ms {
                Some(window) => now_ms.saturating_sub(w.last_seen_ms) <= window,
                None => true,
            })
            .cloned()
            .collect();
        workers.sort_by(|a, b| a.guid.as_str().cmp(b.guid.as_str()));
        Ok(workers)
    }

    async fn register_worker(&self, worker: &WorkerRecord) -> StoreResult<()> {
        let mut record = worker.clone();
        record.last_seen_ms = self.clock.epoch_ms();
        self.tables.lock().workers.insert(record.guid.clone(), record);
        Ok(())
    }

    async fn update_worker_heartbeat(
        &self,
        guid: &WorkerGuid,
        cpu_percent: f32,
        mem_percent: f32,
    ) -> StoreResult<()> {
        let now_ms = self.clock.epoch_ms();
        let mut tables = self.tables.lock();
        let worker = tables
            .workers
            .get_mut(guid)
            .ok_or_else(|| StoreError::not_found("worker", guid))?;
        worker.last_seen_ms = now_ms;
        worker.cpu_percent = cpu_percent;
        worker.mem_percent = mem_percent;
        Ok(())
    }

    async fn acquire_workflow_lease(
        &self,
        id: &WorkflowId,
        owner: &WorkerGuid,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let wf = tables
            .workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("workflow", id))?;
        let held_by_other = wf.owner_id.as_ref().is_some_and(|holder| holder != owner)
            && wf.lease_until_ms.is_some_and(|until| !self.clock.has_expired_ms(until));
        if held_by_other {
            return Ok(false);
        }
        if let Some(previous) = wf.owner_id.as_ref().filter(|prev| *prev != owner) {
            tracing::trace!(workflow = %id, %previous, owner = %owner, "lease taken over");
        }
        wf.owner_id = Some(owner.clone());
        wf.lease_until_ms = Some(self.clock.lease_deadline_ms(ttl));
        Ok(true)
    }

    async fn renew_workflow_lease(
        &self,
        id: &WorkflowId,
        owner: &WorkerGuid,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        let wf = tables
            .workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("workflow", id))?;
        let owned_and_live = wf.owner_id.as_ref() == Some(owner)
            && wf.lease_until_ms.is_some_and(|until| !self.clock.has_expired_ms(until));
        if !owned_and_live {
            return Ok(false);
        }
        wf.lease_until_ms = Some(self.clock.lease_deadline_ms(ttl));
        Ok(true)
    }

    async fn release_workflow_lease(
        &self,
        id: &WorkflowId,
        owner: &WorkerGuid,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        let wf = tables
            .workflows
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("workflow", id))?;
        if wf.owner_id.as_ref() == Some(owner) {
            wf.owner_id = None;
            wf.lease_until_ms = None;
        }
        Ok(())
    }

    async fn append_trace_steps(&self, steps: &[TraceStep]) -> StoreResult<()> {
        self.tables.lock().traces.extend_from_slice(steps);
        Ok(())
    }

    async fn list_trace_steps(
        &self,
        workflow_id: &WorkflowId,
        message_id: Option<&MessageId>,
    ) -> StoreResult<Vec<TraceStep>> {
        let tables = self.tables.lock();
        Ok(tables
            .traces
            .iter()
            .filter(|t| {
                &t.workflow_id == workflow_id
                    && message_id.is_none_or(|id| &t.message_id == id)
            })
            .cloned()
            .collect())
    }

    async fn purge_trace_steps(
        &self,
        workflow_id: &WorkflowId,
        older_than_ms: u64,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before = tables.traces.len();
        tables
            .traces
            .retain(|t| &t.workflow_id != workflow_id || t.at_ms >= older_than_ms);
        Ok((before - tables.traces.len()) as u64)
    }

    async fn get_node_state(
        &self,
        workflow_id: &WorkflowId,
        node_id: &NodeId,
    ) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .lock()
            .node_state
            .get(&(workflow_id.clone(), node_id.clone()))
            .cloned())
    }

    async fn put_node_state(
        &self,
        workflow_id: &WorkflowId,
        node_id: &NodeId,
        state: &[u8],
    ) -> StoreResult<()> {
        self.tables
            .lock()
            .node_state
            .insert((workflow_id.clone(), node_id.clone()), state.to_vec());
        Ok(())
    }

    async fn create_approval(&self, approval: &Approval) -> StoreResult<()> {
        self.tables.lock().approvals.insert(approval.id.clone(), approval.clone());
        Ok(())
    }

    async fn get_approval(&self, id: &ApprovalId) -> StoreResult<Approval> {
        self.tables
            .lock()
            .approvals
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("approval", id))
    }

    async fn resolve_approval(&self, id: &ApprovalId, branch: &str) -> StoreResult<Approval> {
        let mut tables = self.tables.lock();
        let approval = tables
            .approvals
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("approval", id))?;
        if !approval.is_pending() {
            return Err(StoreError::Conflict(format!("approval {id} already resolved")));
        }
        approval.status = ApprovalStatus::Resolved { branch: branch.to_string() };
        Ok(approval.clone())
    }

    async fn list_approvals(&self, workflow_id: &WorkflowId) -> StoreResult<Vec<Approval>> {
        let tables = self.tables.lock();
        let mut approvals: Vec<Approval> = tables
            .approvals
            .values()
            .filter(|a| &a.workflow_id == workflow_id)
            .cloned()
            .collect();
        approvals.sort_by_key(|a| a.created_at_ms);
        Ok(approvals)
    }

    async fn create_outbox_item(&self, item: &OutboxItem) -> StoreResult<()> {
        self.tables.lock().outbox.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn list_outbox_items(
        &self,
        status: Option<OutboxStatus>,
    ) -> StoreResult<Vec<OutboxItem>> {
        let tables = self.tables.lock();
        let mut items: Vec<OutboxItem> = tables
            .outbox
            .values()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        items.sort_by_key(|i| i.created_at_ms);
        Ok(items)
    }

    async fn update_outbox_item(&self, item: &OutboxItem) -> StoreResult<()> {
        let mut tables = self.tables.lock();
        if !tables.outbox.contains_key(&item.id) {
            return Err(StoreError::not_found("outbox item", &item.id));
        }
        tables.outbox.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn purge_outbox(&self, older_than_ms: u64) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before = tables.outbox.len();
        tables
            .outbox
            .retain(|_, i| i.status == OutboxStatus::Pending || i.created_at_ms >= older_than_ms);
        Ok((before - tables.outbox.len()) as u64)
    }

    async fn append_log(&self, entry: &LogEntry) -> StoreResult<()> {
        let mut stamped = entry.clone();
        if stamped.timestamp.is_empty() {
            stamped.timestamp = self.rfc3339(entry.at_ms);
        }
        self.tables.lock().logs.push(stamped);
        Ok(())
    }

    async fn list_logs(
        &self,
        workflow_id: Option<&WorkflowId>,
        limit: usize,
    ) -> StoreResult<Vec<LogEntry>> {
        let tables = self.tables.lock();
        let mut logs: Vec<LogEntry> = tables
            .logs
            .iter()
            .filter(|l| workflow_id.is_none_or(|id| l.workflow_id.as_ref() == Some(id)))
            .cloned()
            .collect();
        if logs.len() > limit {
            logs.drain(..logs.len() - limit);
        }
        Ok(logs)
    }

    async fn purge_logs(&self, older_than_ms: u64) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before = tables.logs.len();
        tables.logs.retain(|l| l.at_ms >= older_than_ms);
        Ok((before - tables.logs.len()) as u64)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut stamped = entry.clone();
        if stamped.timestamp.is_empty() {
            stamped.timestamp = self.rfc3339(entry.at_ms);
        }
        self.tables.lock().audit.push(stamped);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

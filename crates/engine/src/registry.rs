// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local registry of running workflow engines.
//!
//! Start resolves a workflow's endpoints through the adapter registry, opens
//! the adapters, seeds node state from the store, and spawns the engine
//! task. The map is guarded by a reader-writer lock; per-engine operations
//! never hold it across an await.

use crate::bus::LiveEventBus;
use crate::engine::{DeliveryShared, EngineHandle, EngineSetup, EngineState, SinkPort, WorkflowEngine};
use crate::error::{EngineError, EngineResult};
use crate::executor::{ExecOutcome, NodeExecutor};
use crate::priority::wrap_if_prioritized;
use hermod_adapters::{AdapterRegistry, ReplayQueue, Sink, Source};
use hermod_core::{
    ApprovalId, Clock, EndpointId, NodeId, NodeKind, PooledMessage, SystemClock, TraceOutcome,
    WorkerGuid, Workflow, WorkflowId, WorkflowStatus,
};
use hermod_store::MetadataStore;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// Margin on top of a workflow's drain timeout when waiting for stop.
const STOP_WAIT_MARGIN: Duration = Duration::from_secs(2);
/// Lease TTL used when re-acquiring for a rebuild.
const REBUILD_LEASE_TTL: Duration = Duration::from_secs(60);

/// Per-node result of a dry run.
#[derive(Debug, Clone, Serialize)]
pub struct TestNodeResult {
    pub node_id: NodeId,
    pub outcome: TraceOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Message data after the node ran.
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Map of running engines plus the shared wiring they need.
pub struct EngineRegistry {
    engines: RwLock<HashMap<WorkflowId, EngineHandle>>,
    store: Arc<dyn MetadataStore>,
    adapters: Arc<AdapterRegistry>,
    bus: Arc<LiveEventBus>,
    owner: WorkerGuid,
}

impl EngineRegistry {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        adapters: Arc<AdapterRegistry>,
        bus: Arc<LiveEventBus>,
        owner: WorkerGuid,
    ) -> Self {
        Self { engines: RwLock::new(HashMap::new()), store, adapters, bus, owner }
    }

    pub fn bus(&self) -> &Arc<LiveEventBus> {
        &self.bus
    }

    pub fn owner(&self) -> &WorkerGuid {
        &self.owner
    }

    /// Workflow ids with an active (starting/running/draining) engine.
    pub fn running(&self) -> Vec<WorkflowId> {
        self.engines
            .read()
            .iter()
            .filter(|(_, handle)| handle.is_active())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_running(&self, id: &WorkflowId) -> bool {
        self.engines.read().get(id).is_some_and(EngineHandle::is_active)
    }

    /// Drop handles of engines that reached a terminal state on their own.
    pub fn sweep_terminal(&self) {
        self.engines.write().retain(|_, handle| handle.is_active());
    }

    /// Engine state for a workflow, if an engine exists for it.
    pub fn status(&self, id: &WorkflowId) -> Option<EngineState> {
        self.engines.read().get(id).map(EngineHandle::state)
    }

    fn handle(&self, id: &WorkflowId) -> EngineResult<EngineHandle> {
        self.engines
            .read()
            .get(id)
            .filter(|handle| handle.is_active())
            .cloned()
            .ok_or_else(|| EngineError::NotRunning(id.clone()))
    }

    /// Start an engine for the workflow. Idempotent: a second start while
    /// one is active returns the [`EngineError::AlreadyRunning`] sentinel.
    pub async fn start_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        self.start_with_offset(workflow, None).await
    }

    async fn start_with_offset(
        &self,
        workflow: &Workflow,
        start_offset: Option<u64>,
    ) -> EngineResult<()> {
        {
            let engines = self.engines.read();
            if engines.get(&workflow.id).is_some_and(EngineHandle::is_active) {
                return Err(EngineError::AlreadyRunning(workflow.id.clone()));
            }
        }

        let setup = match self.resolve(workflow, start_offset).await {
            Ok(setup) => setup,
            Err(err) => {
                error!(workflow = %workflow.id, error = %err, "engine start failed");
                let _ = self
                    .store
                    .update_workflow_status(&workflow.id, WorkflowStatus::Error)
                    .await;
                self.bus.publish_status(
                    &hermod_core::StatusEvent::new(
                        workflow.id.clone(),
                        WorkflowStatus::Error,
                        SystemClock.epoch_ms(),
                    )
                    .with_detail(err.to_string()),
                );
                return Err(err);
            }
        };

        let (handle, join) = WorkflowEngine::spawn(setup);
        self.engines.write().insert(workflow.id.clone(), handle);
        self.supervise(workflow.id.clone(), join);
        info!(workflow = %workflow.id, "engine started");
        Ok(())
    }

    /// Recover engine-task panics at the boundary: report Error and release
    /// the lease so another worker can take over.
    fn supervise(&self, workflow_id: WorkflowId, join: tokio::task::JoinHandle<()>) {
        let store = self.store.clone();
        let bus = self.bus.clone();
        let owner = self.owner.clone();
        tokio::spawn(async move {
            if let Err(join_err) = join.await {
                error!(workflow = %workflow_id, error = %join_err, "engine task panicked");
                let _ = store
                    .update_workflow_status(&workflow_id, WorkflowStatus::Error)
                    .await;
                let _ = store.release_workflow_lease(&workflow_id, &owner).await;
                bus.publish_status(
                    &hermod_core::StatusEvent::new(
                        workflow_id.clone(),
                        WorkflowStatus::Error,
                        SystemClock.epoch_ms(),
                    )
                    .with_detail(format!("engine task panicked: {join_err}")),
                );
            }
        });
    }

    /// Resolve endpoints, build and open adapters, seed node state.
    async fn resolve(
        &self,
        workflow: &Workflow,
        start_offset: Option<u64>,
    ) -> EngineResult<EngineSetup> {
        workflow.validate()?;

        let source_node = workflow
            .source_node()
            .ok_or_else(|| EngineError::Config("workflow has no source node".to_string()))?;
        let NodeKind::Source { endpoint: source_endpoint_id } = &source_node.kind else {
            return Err(EngineError::Config("source node has a non-source kind".to_string()));
        };

        let source_endpoint = self.store.get_endpoint(source_endpoint_id).await?;
        let mut source = self.adapters.build_source(&source_endpoint)?;

        let mut sinks: HashMap<NodeId, SinkPort> = HashMap::new();
        let mut sink_order: Vec<NodeId> = Vec::new();
        let mut dlqs: HashMap<EndpointId, Arc<AsyncMutex<Box<dyn ReplayQueue>>>> = HashMap::new();
        let mut first_dlq: Option<EndpointId> = None;

        for node in workflow.sink_nodes() {
            let NodeKind::Sink { endpoint: endpoint_id } = &node.kind else {
                continue;
            };
            let endpoint = self.store.get_endpoint(endpoint_id).await?;
            let mut sink = self.adapters.build_sink(&endpoint)?;
            sink.open().await?;

            if let Some(dlq_id) = &endpoint.dlq {
                if !dlqs.contains_key(dlq_id) {
                    let dlq_endpoint = self.store.get_endpoint(dlq_id).await?;
                    let mut queue = self.adapters.build_queue(&dlq_endpoint)?;
                    Sink::open(&mut *queue).await?;
                    dlqs.insert(dlq_id.clone(), Arc::new(AsyncMutex::new(queue)));
                    first_dlq.get_or_insert_with(|| dlq_id.clone());
                }
            }

            sink_order.push(node.id.clone());
            sinks.insert(
                node.id.clone(),
                SinkPort {
                    sink: Arc::new(AsyncMutex::new(sink)),
                    endpoint_id: endpoint.id.clone(),
                    idempotent: endpoint.idempotent,
                    dlq: endpoint.dlq.clone(),
                },
            );
        }

        // DLQ-as-source views: one for the priority wrapper, one for
        // explicit drain requests. Separate instances keep the cycle broken.
        let mut drain_source: Option<Box<dyn ReplayQueue>> = None;
        let mut priority_dlq: Option<Box<dyn ReplayQueue>> = None;
        if let Some(dlq_id) = &first_dlq {
            let dlq_endpoint = self.store.get_endpoint(dlq_id).await?;
            let mut drain = self.adapters.build_queue(&dlq_endpoint)?;
            Source::open(&mut *drain).await?;
            drain_source = Some(drain);
            if workflow.settings.prioritize_dlq {
                let mut queue = self.adapters.build_queue(&dlq_endpoint)?;
                Source::open(&mut *queue).await?;
                priority_dlq = Some(queue);
            }
        }

        source.open().await?;

        // Seed restart-safe positions and stateful nodes from the store.
        let mut executor = NodeExecutor::new();
        for node in &workflow.nodes {
            let Some(bytes) = self.store.get_node_state(&workflow.id, &node.id).await? else {
                continue;
            };
            if node.id == source_node.id {
                if let Ok(state) =
                    serde_json::from_slice::<HashMap<String, String>>(&bytes)
                {
                    source.set_state(state);
                }
            } else {
                executor.seed_state(node, &bytes);
            }
        }
        if let Some(offset) = start_offset {
            // Rebuild: bypass the persisted cursor.
            source.seek(offset)?;
        }

        let source =
            wrap_if_prioritized(workflow.settings.prioritize_dlq, source, priority_dlq)?;

        let shared = Arc::new(DeliveryShared {
            workflow_id: workflow.id.clone(),
            settings: workflow.settings.clone(),
            sinks,
            dlqs,
            bus: self.bus.clone(),
        });

        Ok(EngineSetup {
            workflow: workflow.clone(),
            source,
            source_node_id: source_node.id.clone(),
            shared,
            drain_source,
            executor,
            store: self.store.clone(),
            bus: self.bus.clone(),
            owner: self.owner.clone(),
            sink_order,
        })
    }

    /// Drain and stop one engine. Waits for the drain bounded by the
    /// workflow's drain timeout plus a margin.
    pub async fn stop_engine(&self, id: &WorkflowId) -> EngineResult<()> {
        let handle = self.handle(id)?;
        let drain_timeout = self
            .store
            .get_workflow(id)
            .await
            .map(|wf| Duration::from_millis(wf.settings.drain_timeout_ms))
            .unwrap_or(Duration::from_secs(10));
        handle.stop();
        let state = handle.wait_terminal(drain_timeout + STOP_WAIT_MARGIN).await;
        if state.is_active() {
            warn!(workflow = %id, %state, "engine did not stop within the drain window");
        }
        self.engines.write().remove(id);
        Ok(())
    }

    /// Stop every engine in parallel.
    pub async fn stop_all(&self) {
        let handles: Vec<EngineHandle> = self.engines.read().values().cloned().collect();
        let mut waits = tokio::task::JoinSet::new();
        for handle in handles {
            if !handle.is_active() {
                continue;
            }
            handle.stop();
            waits.spawn(async move {
                handle.wait_terminal(Duration::from_secs(15)).await;
            });
        }
        while waits.join_next().await.is_some() {}
        self.engines.write().clear();
    }

    /// Forward a DLQ drain request to the engine.
    pub async fn drain_workflow_dlq(&self, id: &WorkflowId) -> EngineResult<u64> {
        self.handle(id)?.drain_dlq().await
    }

    /// Resume a suspended approval on the named branch.
    pub async fn resume_approval(
        &self,
        id: &WorkflowId,
        approval_id: ApprovalId,
        branch: &str,
    ) -> EngineResult<()> {
        self.handle(id)?.resume_approval(approval_id, branch.to_string()).await
    }

    /// Restart the workflow with the source positioned at `from_offset`.
    ///
    /// The stop releases the lease, so it is re-acquired before the fresh
    /// engine starts; a conflict aborts the rebuild.
    pub async fn rebuild_workflow(&self, id: &WorkflowId, from_offset: u64) -> EngineResult<()> {
        if self.is_running(id) {
            self.stop_engine(id).await?;
        }
        let acquired = self
            .store
            .acquire_workflow_lease(id, &self.owner, REBUILD_LEASE_TTL)
            .await?;
        if !acquired {
            return Err(EngineError::LeaseConflict(id.clone()));
        }
        let workflow = self.store.get_workflow(id).await?;
        info!(workflow = %id, from_offset, "rebuilding");
        self.start_with_offset(&workflow, Some(from_offset)).await
    }

    /// Dry-run a workflow graph over a sample message: no acks, no real
    /// sinks, per-node results back to the caller.
    pub fn test_workflow(
        &self,
        workflow: &Workflow,
        sample: serde_json::Value,
    ) -> EngineResult<Vec<TestNodeResult>> {
        workflow.validate()?;
        let source_node = workflow
            .source_node()
            .ok_or_else(|| EngineError::Config("workflow has no source node".to_string()))?;

        let mut message = PooledMessage::new();
        message.topic.push_str("sample");
        if let serde_json::Value::Object(map) = sample {
            message.data = map;
        } else {
            message.data.insert("value".to_string(), sample);
        }

        let mut executor = NodeExecutor::new();
        let mut results = Vec::new();
        let mut worklist: Vec<(NodeId, PooledMessage)> = Vec::new();

        for edge in source_node.edges_for("") {
            worklist.push((edge.to.clone(), message.deep_clone()));
        }
        results.push(TestNodeResult {
            node_id: source_node.id.clone(),
            outcome: TraceOutcome::Ok,
            error: None,
            data: message.data.clone(),
        });
        drop(message);

        let mut steps = 0usize;
        while !worklist.is_empty() {
            let (node_id, msg) = worklist.remove(0);
            steps += 1;
            if steps > 10_000 {
                return Err(EngineError::Config("graph exceeded the walk budget".to_string()));
            }
            let Some(node) = workflow.node(&node_id) else {
                continue;
            };

            if let NodeKind::Sink { .. } = node.kind {
                results.push(TestNodeResult {
                    node_id,
                    outcome: TraceOutcome::Delivered,
                    error: None,
                    data: msg.data.clone(),
                });
                continue;
            }

            match executor.execute(node, msg) {
                Ok(ExecOutcome::Emit(branch, msg)) => {
                    let outcome = if branch.is_empty() {
                        TraceOutcome::Ok
                    } else {
                        TraceOutcome::Branch(branch.clone())
                    };
                    results.push(TestNodeResult {
                        node_id: node.id.clone(),
                        outcome,
                        error: None,
                        data: msg.data.clone(),
                    });
                    let targets: Vec<NodeId> =
                        node.edges_for(&branch).map(|e| e.to.clone()).collect();
                    let count = targets.len();
                    let mut msg = Some(msg);
                    for (i, target) in targets.into_iter().enumerate() {
                        let forwarded = if i + 1 == count {
                            match msg.take() {
                                Some(m) => m,
                                None => continue,
                            }
                        } else {
                            match msg.as_ref() {
                                Some(m) => m.deep_clone(),
                                None => continue,
                            }
                        };
                        worklist.push((target, forwarded));
                    }
                }
                Ok(ExecOutcome::Drop) => {
                    results.push(TestNodeResult {
                        node_id: node.id.clone(),
                        outcome: TraceOutcome::Dropped,
                        error: None,
                        data: serde_json::Map::new(),
                    });
                }
                Ok(ExecOutcome::Suspend(msg)) => {
                    results.push(TestNodeResult {
                        node_id: node.id.clone(),
                        outcome: TraceOutcome::Suspended,
                        error: None,
                        data: msg.data.clone(),
                    });
                }
                Ok(ExecOutcome::Delay { message, .. }) => {
                    // Dry runs do not sleep; continue immediately.
                    results.push(TestNodeResult {
                        node_id: node.id.clone(),
                        outcome: TraceOutcome::Delayed,
                        error: None,
                        data: message.data.clone(),
                    });
                    for edge in node.edges_for("") {
                        worklist.push((edge.to.clone(), message.deep_clone()));
                    }
                }
                Err(err) => {
                    results.push(TestNodeResult {
                        node_id: node.id.clone(),
                        outcome: TraceOutcome::Failed,
                        error: Some(err.to_string()),
                        data: serde_json::Map::new(),
                    });
                }
            }
        }

        Ok(results)
    }

    pub fn subscribe_status(&self) -> tokio::sync::mpsc::Receiver<hermod_core::StatusEvent> {
        self.bus.subscribe_status()
    }

    pub fn subscribe_logs(&self) -> tokio::sync::mpsc::Receiver<hermod_core::LogEntry> {
        self.bus.subscribe_logs()
    }

    pub fn subscribe_messages(&self) -> tokio::sync::mpsc::Receiver<hermod_core::LiveMessage> {
        self.bus.subscribe_messages()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

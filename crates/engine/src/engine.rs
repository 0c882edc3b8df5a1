// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-workflow engine: source → node graph → sinks.
//!
//! One engine instance drives one workflow run on its own task. The task
//! owns the source; sink writes run as bounded concurrent deliveries behind
//! shared handles. A message is acked upstream only once every sink it
//! reached has succeeded or the message went to the DLQ, and stateful-node
//! state is flushed to the store before that ack.

use crate::bus::LiveEventBus;
use crate::error::{EngineError, EngineResult};
use crate::executor::{ExecOutcome, NodeExecutor};
use crate::expr;
use crate::priority::{ORIGIN_DLQ, ORIGIN_KEY};
use crate::retry::Backoff;
use crate::trace_buffer::TraceBuffer;
use hermod_adapters::{ReplayQueue, Sink, Source};
use hermod_core::{
    counters, Clock, EndpointId, LiveMessage, LogEntry, LogLevel, MessageId, NodeId, NodeKind,
    PooledMessage, StatusEvent, SystemClock, TraceOutcome, TraceStep, WorkerGuid, Workflow,
    WorkflowSettings, WorkflowStatus,
};
use hermod_store::MetadataStore;
use sha2::{Digest, Sha256};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 16;
/// Pause after a transient source read error.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(500);
/// Walk-step bound; a graph cycle trips this instead of spinning forever.
const MAX_WALK_STEPS: usize = 10_000;
/// Metadata key carrying the idempotency key to sinks.
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Engine lifecycle. A fresh instance is created per start; re-entering
/// `Running` after `Stopped` is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Starting,
    Running,
    Draining,
    Stopped,
    Error,
}

impl EngineState {
    /// Starting, Running, and Draining count as active for the registry.
    pub fn is_active(&self) -> bool {
        matches!(self, EngineState::Starting | EngineState::Running | EngineState::Draining)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Draining => "draining",
            EngineState::Stopped => "stopped",
            EngineState::Error => "error",
        };
        write!(f, "{name}")
    }
}

pub(crate) enum EngineCommand {
    ResumeApproval {
        approval_id: hermod_core::ApprovalId,
        branch: String,
        reply: oneshot::Sender<EngineResult<()>>,
    },
    DrainDlq {
        reply: oneshot::Sender<EngineResult<u64>>,
    },
}

/// Client half of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    workflow_id: hermod_core::WorkflowId,
    cancel: CancellationToken,
    state: watch::Receiver<EngineState>,
    commands: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn workflow_id(&self) -> &hermod_core::WorkflowId {
        &self.workflow_id
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Request a drain; the engine finishes in-flight work and stops.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait until the engine reaches a terminal state, bounded by `timeout`.
    pub async fn wait_terminal(&self, timeout: Duration) -> EngineState {
        let mut rx = self.state.clone();
        let _ = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| matches!(s, EngineState::Stopped | EngineState::Error)),
        )
        .await;
        let state = *rx.borrow();
        state
    }

    pub(crate) async fn resume_approval(
        &self,
        approval_id: hermod_core::ApprovalId,
        branch: String,
    ) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::ResumeApproval { approval_id, branch, reply })
            .await
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)?
    }

    pub(crate) async fn drain_dlq(&self) -> EngineResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::DrainDlq { reply })
            .await
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::EngineGone)?
    }
}

/// One sink terminal, shared with delivery tasks.
pub(crate) struct SinkPort {
    pub(crate) sink: Arc<AsyncMutex<Box<dyn Sink>>>,
    pub(crate) endpoint_id: EndpointId,
    pub(crate) idempotent: bool,
    pub(crate) dlq: Option<EndpointId>,
}

/// Immutable context cloned into every delivery task.
pub(crate) struct DeliveryShared {
    pub(crate) workflow_id: hermod_core::WorkflowId,
    pub(crate) settings: WorkflowSettings,
    pub(crate) sinks: HashMap<NodeId, SinkPort>,
    pub(crate) dlqs: HashMap<EndpointId, Arc<AsyncMutex<Box<dyn ReplayQueue>>>>,
    pub(crate) bus: Arc<LiveEventBus>,
}

/// Everything the registry resolves before spawning the engine task.
pub(crate) struct EngineSetup {
    pub(crate) workflow: Workflow,
    pub(crate) source: Box<dyn Source>,
    pub(crate) source_node_id: NodeId,
    pub(crate) shared: Arc<DeliveryShared>,
    /// Separate DLQ-as-source view for explicit drain requests.
    pub(crate) drain_source: Option<Box<dyn ReplayQueue>>,
    pub(crate) executor: NodeExecutor,
    pub(crate) store: Arc<dyn MetadataStore>,
    pub(crate) bus: Arc<LiveEventBus>,
    pub(crate) owner: WorkerGuid,
    /// Reverse-close ordering: sink node ids in wire order.
    pub(crate) sink_order: Vec<NodeId>,
}

/// Where a message's ack should go on terminal disposition.
enum AckTarget {
    /// The engine's source (or priority wrapper, which routes by id).
    Source,
    /// Consumed elsewhere (explicit DLQ drain); nothing to ack.
    None,
}

struct InflightEntry {
    offset: u64,
    /// Outstanding lineages: incomplete deliveries, suspensions, delays.
    pending: usize,
    ack: AckTarget,
}

struct SuspendedLineage {
    node_id: NodeId,
    message: PooledMessage,
}

struct DelayedLineage {
    due: Instant,
    seq: u64,
    node_id: NodeId,
    message: PooledMessage,
}

impl PartialEq for DelayedLineage {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for DelayedLineage {}
impl PartialOrd for DelayedLineage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DelayedLineage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Output of one graph walk.
#[derive(Default)]
struct WalkOutput {
    sink_items: Vec<(NodeId, PooledMessage)>,
    suspensions: Vec<(NodeId, PooledMessage)>,
    delays: Vec<(NodeId, u64, PooledMessage)>,
    data_errors: Vec<(NodeId, PooledMessage, String)>,
    traces: Vec<TraceStep>,
}

struct DeliveryJob {
    message_id: MessageId,
    partition_key: Option<String>,
    items: Vec<(NodeId, PooledMessage)>,
}

struct DeliveryOutcome {
    message_id: MessageId,
    partition_key: Option<String>,
    /// Lineages terminally disposed (delivered, dead-lettered, or dropped).
    completed: usize,
    /// Set when the park policy fired; the engine stops.
    parked: Option<String>,
    traces: Vec<TraceStep>,
}

enum Step {
    Cancelled,
    Command(Option<EngineCommand>),
    Outcome(Result<DeliveryOutcome, tokio::task::JoinError>),
    DelayDue,
    DrainTimeout,
    Read(hermod_adapters::AdapterResult<Option<PooledMessage>>),
}

pub(crate) struct WorkflowEngine {
    workflow: Workflow,
    settings: WorkflowSettings,
    source: Box<dyn Source>,
    source_node_id: NodeId,
    shared: Arc<DeliveryShared>,
    drain_source: Option<Box<dyn ReplayQueue>>,
    executor: NodeExecutor,
    traces: TraceBuffer,
    store: Arc<dyn MetadataStore>,
    bus: Arc<LiveEventBus>,
    owner: WorkerGuid,
    clock: SystemClock,
    sink_order: Vec<NodeId>,

    cancel: CancellationToken,
    state_tx: watch::Sender<EngineState>,
    commands: mpsc::Receiver<EngineCommand>,

    inflight: HashMap<MessageId, InflightEntry>,
    suspended: HashMap<hermod_core::ApprovalId, SuspendedLineage>,
    delays: BinaryHeap<Reverse<DelayedLineage>>,
    delay_seq: u64,
    deliveries: JoinSet<DeliveryOutcome>,
    waiting_by_key: HashMap<String, VecDeque<DeliveryJob>>,
    keys_inflight: HashSet<String>,

    draining: bool,
    drain_deadline: Option<Instant>,
    commands_closed: bool,
    eos: bool,
    parked: Option<String>,
    fatal: Option<String>,
}

impl WorkflowEngine {
    /// Spawn the engine task. The returned handle is the only way in.
    pub(crate) fn spawn(setup: EngineSetup) -> (EngineHandle, tokio::task::JoinHandle<()>) {
        let (state_tx, state_rx) = watch::channel(EngineState::Starting);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();

        let settings = setup.workflow.settings.clone();
        let workflow_id = setup.workflow.id.clone();
        let engine = WorkflowEngine {
            settings,
            source: setup.source,
            source_node_id: setup.source_node_id,
            shared: setup.shared,
            drain_source: setup.drain_source,
            executor: setup.executor,
            traces: TraceBuffer::new(),
            store: setup.store,
            bus: setup.bus,
            owner: setup.owner,
            clock: SystemClock,
            sink_order: setup.sink_order,
            workflow: setup.workflow,
            cancel: cancel.clone(),
            state_tx,
            commands: command_rx,
            inflight: HashMap::new(),
            suspended: HashMap::new(),
            delays: BinaryHeap::new(),
            delay_seq: 0,
            deliveries: JoinSet::new(),
            waiting_by_key: HashMap::new(),
            keys_inflight: HashSet::new(),
            draining: false,
            drain_deadline: None,
            commands_closed: false,
            eos: false,
            parked: None,
            fatal: None,
        };

        let handle = EngineHandle {
            workflow_id,
            cancel,
            state: state_rx,
            commands: command_tx,
        };
        let join = tokio::spawn(engine.run());
        (handle, join)
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
    }

    async fn report_status(&self, status: WorkflowStatus, detail: Option<String>) {
        let at_ms = self.clock.epoch_ms();
        let mut event = StatusEvent::new(self.workflow.id.clone(), status, at_ms);
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.bus.publish_status(&event);
        if let Err(err) = self.store.update_workflow_status(&self.workflow.id, status).await {
            warn!(workflow = %self.workflow.id, error = %err, "status update failed");
        }
    }

    async fn log(&self, level: LogLevel, message: String) {
        let entry = LogEntry::new(self.clock.epoch_ms(), level, message)
            .for_workflow(self.workflow.id.clone())
            .from_worker(self.owner.clone());
        self.bus.publish_log(&entry);
        let _ = self.store.append_log(&entry).await;
    }

    async fn run(mut self) {
        info!(workflow = %self.workflow.id, "engine running");
        self.set_state(EngineState::Running);
        self.report_status(WorkflowStatus::Active, None).await;

        loop {
            if self.parked.is_some() || self.fatal.is_some() {
                break;
            }
            if self.draining && self.drained() {
                break;
            }
            if self.eos && self.inflight.is_empty() && self.deliveries.is_empty() {
                break;
            }

            let step = self.next_step().await;
            match step {
                Step::Cancelled => {
                    info!(workflow = %self.workflow.id, "drain requested");
                    self.draining = true;
                    self.drain_deadline =
                        Some(Instant::now() + Duration::from_millis(self.settings.drain_timeout_ms));
                    self.set_state(EngineState::Draining);
                    self.report_status(WorkflowStatus::Draining, None).await;
                }
                Step::Command(None) => {
                    // Registry dropped the handle; treat as a stop request.
                    self.commands_closed = true;
                    self.draining = true;
                    self.drain_deadline =
                        Some(Instant::now() + Duration::from_millis(self.settings.drain_timeout_ms));
                    self.set_state(EngineState::Draining);
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Outcome(Ok(outcome)) => self.handle_outcome(outcome).await,
                Step::Outcome(Err(join_err)) => {
                    // A delivery task panicked; recover at the engine boundary.
                    error!(workflow = %self.workflow.id, error = %join_err, "delivery task failed");
                    self.fatal = Some(format!("delivery task failed: {join_err}"));
                }
                Step::DelayDue => self.fire_due_delays().await,
                Step::DrainTimeout => {
                    warn!(workflow = %self.workflow.id, "drain timeout; abandoning in-flight work");
                    break;
                }
                Step::Read(Ok(Some(message))) => {
                    self.process_message(message, AckTarget::Source).await;
                }
                Step::Read(Ok(None)) => {
                    debug!(workflow = %self.workflow.id, "source end of stream");
                    self.eos = true;
                }
                Step::Read(Err(err)) if err.is_transient() => {
                    self.log(LogLevel::Warn, format!("source read failed: {err}")).await;
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                }
                Step::Read(Err(hermod_adapters::AdapterError::Closed)) if self.draining => {}
                Step::Read(Err(err)) => {
                    self.log(LogLevel::Error, format!("source failed: {err}")).await;
                    self.fatal = Some(format!("source failed: {err}"));
                }
            }
        }

        self.shutdown().await;
    }

    /// One reactor turn. Arms borrow disjoint fields; handling happens on
    /// the returned step with the futures dropped.
    async fn next_step(&mut self) -> Step {
        let queued: usize = self.waiting_by_key.values().map(VecDeque::len).sum();
        let can_read = !self.draining
            && !self.eos
            && self.deliveries.len() + queued < self.settings.max_inflight.max(1);
        let delay_deadline = self.delays.peek().map(|Reverse(d)| d.due);
        let drain_deadline = self.drain_deadline;
        let cancel = self.cancel.clone();
        let draining = self.draining;
        let commands_closed = self.commands_closed;

        let source = &mut self.source;
        let commands = &mut self.commands;
        let deliveries = &mut self.deliveries;

        tokio::select! {
            _ = cancel.cancelled(), if !draining => Step::Cancelled,
            command = commands.recv(), if !commands_closed => Step::Command(command),
            // An empty set resolves `None`, which disables this branch.
            Some(outcome) = deliveries.join_next() => Step::Outcome(outcome),
            _ = sleep_until_opt(delay_deadline), if delay_deadline.is_some() => Step::DelayDue,
            _ = sleep_until_opt(drain_deadline), if drain_deadline.is_some() => Step::DrainTimeout,
            read = source.read(&cancel), if can_read => Step::Read(read),
        }
    }

    fn drained(&self) -> bool {
        self.deliveries.is_empty() && self.waiting_by_key.values().all(VecDeque::is_empty)
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::ResumeApproval { approval_id, branch, reply } => {
                let result = self.resume_approval(approval_id, branch).await;
                let _ = reply.send(result);
            }
            EngineCommand::DrainDlq { reply } => {
                let result = self.drain_dlq().await;
                let _ = reply.send(result);
            }
        }
    }

    /// Ingest one message: walk the graph and dispatch its lineages.
    async fn process_message(&mut self, message: PooledMessage, ack: AckTarget) {
        let message_id = message.id.clone();
        let offset = message.offset;
        counters().messages_processed.fetch_add(1, Ordering::Relaxed);

        self.bus.publish_message(&LiveMessage {
            workflow_id: self.workflow.id.clone(),
            message_id: message_id.clone(),
            node_id: None,
            topic: message.topic.clone(),
            operation: message.operation,
            offset,
            at_ms: self.clock.epoch_ms(),
            data: message.data.clone(),
        });

        let partition_key = self
            .settings
            .partition_key
            .as_deref()
            .and_then(|key| expr::get_path(&message.data, key).map(expr::stringify));

        self.inflight.insert(message_id.clone(), InflightEntry { offset, pending: 0, ack });

        let source_node = self.source_node_id.clone();
        let output = self.walk(&source_node, "", message);
        self.apply_walk(message_id, partition_key, output).await;
    }

    /// Walk the graph from one node's outgoing edges on a branch.
    fn walk(&mut self, from: &NodeId, branch: &str, message: PooledMessage) -> WalkOutput {
        let mut output = WalkOutput::default();
        let mut worklist: VecDeque<(NodeId, PooledMessage)> = VecDeque::new();
        self.enqueue_targets(from, branch, message, &mut worklist, &mut output);

        let mut steps = 0usize;
        while let Some((node_id, msg)) = worklist.pop_front() {
            steps += 1;
            if steps > MAX_WALK_STEPS {
                output.data_errors.push((
                    node_id,
                    msg,
                    "node graph exceeded the walk budget (cycle?)".to_string(),
                ));
                continue;
            }

            let node = match self.workflow.node(&node_id) {
                Some(node) => node.clone(),
                None => {
                    // Validated at start; a missing node mid-run is a data error.
                    output.data_errors.push((
                        node_id.clone(),
                        msg,
                        format!("unknown node {node_id}"),
                    ));
                    continue;
                }
            };

            if let NodeKind::Sink { .. } = node.kind {
                output.sink_items.push((node_id, msg));
                continue;
            }

            let message_id = msg.id.clone();
            match self.executor.execute(&node, msg) {
                Ok(ExecOutcome::Emit(branch, msg)) => {
                    let outcome = if branch.is_empty() {
                        TraceOutcome::Ok
                    } else {
                        TraceOutcome::Branch(branch.clone())
                    };
                    output.traces.push(TraceStep::new(
                        self.workflow.id.clone(),
                        message_id,
                        node.id.clone(),
                        self.clock.epoch_ms(),
                        outcome,
                    ));
                    self.enqueue_targets(&node.id, &branch, msg, &mut worklist, &mut output);
                }
                Ok(ExecOutcome::Drop) => {
                    counters().messages_dropped.fetch_add(1, Ordering::Relaxed);
                    output.traces.push(TraceStep::new(
                        self.workflow.id.clone(),
                        message_id,
                        node.id.clone(),
                        self.clock.epoch_ms(),
                        TraceOutcome::Dropped,
                    ));
                }
                Ok(ExecOutcome::Suspend(msg)) => {
                    counters().approvals_suspended.fetch_add(1, Ordering::Relaxed);
                    output.traces.push(TraceStep::new(
                        self.workflow.id.clone(),
                        message_id,
                        node.id.clone(),
                        self.clock.epoch_ms(),
                        TraceOutcome::Suspended,
                    ));
                    output.suspensions.push((node.id.clone(), msg));
                }
                Ok(ExecOutcome::Delay { after_ms, message }) => {
                    output.traces.push(TraceStep::new(
                        self.workflow.id.clone(),
                        message_id,
                        node.id.clone(),
                        self.clock.epoch_ms(),
                        TraceOutcome::Delayed,
                    ));
                    output.delays.push((node.id.clone(), after_ms, message));
                }
                Err(err) => {
                    counters().executor_errors.fetch_add(1, Ordering::Relaxed);
                    // The message was consumed by the failed execute; trace
                    // the failure without a replay copy.
                    output.traces.push(
                        TraceStep::new(
                            self.workflow.id.clone(),
                            message_id,
                            node.id.clone(),
                            self.clock.epoch_ms(),
                            TraceOutcome::Failed,
                        )
                        .with_error(err.to_string()),
                    );
                }
            }
        }
        output
    }

    /// Fan a message out to every edge of `from` matching `branch`,
    /// deep-cloning for all but the first target.
    fn enqueue_targets(
        &self,
        from: &NodeId,
        branch: &str,
        message: PooledMessage,
        worklist: &mut VecDeque<(NodeId, PooledMessage)>,
        _output: &mut WalkOutput,
    ) {
        let Some(node) = self.workflow.node(from) else {
            return;
        };
        let targets: Vec<NodeId> = node.edges_for(branch).map(|e| e.to.clone()).collect();
        let mut message = Some(message);
        let count = targets.len();
        for (i, target) in targets.into_iter().enumerate() {
            let msg = if i + 1 == count {
                match message.take() {
                    Some(msg) => msg,
                    None => continue,
                }
            } else {
                match message.as_ref() {
                    Some(msg) => msg.deep_clone(),
                    None => continue,
                }
            };
            worklist.push_back((target, msg));
        }
        // No matching edges: the lineage ends here and the message releases.
    }

    /// Apply a walk's results to the in-flight ledger and dispatch work.
    async fn apply_walk(
        &mut self,
        message_id: MessageId,
        partition_key: Option<String>,
        output: WalkOutput,
    ) {
        for step in output.traces {
            self.traces.push(step);
        }
        if self.traces.should_flush() && !self.traces.flush(&self.store).await {
            self.log(LogLevel::Warn, "trace flush failed; running degraded".to_string()).await;
        }

        let mut added = 0usize;

        for (node_id, message) in output.suspensions {
            let approval = hermod_core::Approval::pending(
                self.workflow.id.clone(),
                node_id.clone(),
                message.id.clone(),
                self.clock.epoch_ms(),
            );
            match self.store.create_approval(&approval).await {
                Ok(()) => {
                    self.suspended
                        .insert(approval.id, SuspendedLineage { node_id, message });
                    added += 1;
                }
                Err(err) => {
                    self.log(
                        LogLevel::Error,
                        format!("approval record failed at node {node_id}: {err}"),
                    )
                    .await;
                    counters().messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        for (node_id, after_ms, message) in output.delays {
            self.delay_seq += 1;
            self.delays.push(Reverse(DelayedLineage {
                due: Instant::now() + Duration::from_millis(after_ms),
                seq: self.delay_seq,
                node_id,
                message,
            }));
            added += 1;
        }

        for (node_id, message, reason) in output.data_errors {
            self.dead_letter_or_drop(&node_id, message, &reason).await;
        }

        if !output.sink_items.is_empty() {
            added += output.sink_items.len();
            self.dispatch(DeliveryJob {
                message_id: message_id.clone(),
                partition_key,
                items: output.sink_items,
            });
        }

        if let Some(entry) = self.inflight.get_mut(&message_id) {
            entry.pending += added;
            if entry.pending == 0 {
                self.finalize(message_id).await;
            }
        }
    }

    /// Data-error disposition: DLQ when one is configured, else drop.
    async fn dead_letter_or_drop(&mut self, node_id: &NodeId, message: PooledMessage, reason: &str) {
        let dlq = self.shared.dlqs.iter().next().map(|(id, q)| (id.clone(), q.clone()));
        let trace = match dlq {
            Some((_endpoint, queue)) => {
                let result = {
                    let mut queue = queue.lock().await;
                    Sink::write(&mut **queue, &message).await
                };
                match result {
                    Ok(()) => {
                        counters().dlq_writes.fetch_add(1, Ordering::Relaxed);
                        TraceStep::new(
                            self.workflow.id.clone(),
                            message.id.clone(),
                            node_id.clone(),
                            self.clock.epoch_ms(),
                            TraceOutcome::DeadLettered,
                        )
                        .with_error(reason.to_string())
                    }
                    Err(err) => {
                        counters().messages_dropped.fetch_add(1, Ordering::Relaxed);
                        TraceStep::new(
                            self.workflow.id.clone(),
                            message.id.clone(),
                            node_id.clone(),
                            self.clock.epoch_ms(),
                            TraceOutcome::Failed,
                        )
                        .with_error(format!("{reason}; DLQ write failed: {err}"))
                    }
                }
            }
            None => {
                counters().messages_dropped.fetch_add(1, Ordering::Relaxed);
                TraceStep::new(
                    self.workflow.id.clone(),
                    message.id.clone(),
                    node_id.clone(),
                    self.clock.epoch_ms(),
                    TraceOutcome::Failed,
                )
                .with_error(reason.to_string())
            }
        };
        self.traces.push(trace);
    }

    /// Start a delivery, or park it behind its partition key.
    fn dispatch(&mut self, job: DeliveryJob) {
        if let Some(key) = &job.partition_key {
            if self.keys_inflight.contains(key) {
                self.waiting_by_key.entry(key.clone()).or_default().push_back(job);
                return;
            }
            self.keys_inflight.insert(key.clone());
        }
        let shared = self.shared.clone();
        self.deliveries.spawn(run_delivery(shared, job));
    }

    async fn handle_outcome(&mut self, outcome: DeliveryOutcome) {
        for step in outcome.traces {
            self.traces.push(step);
        }

        if let Some(key) = &outcome.partition_key {
            self.keys_inflight.remove(key);
            if let Some(queue) = self.waiting_by_key.get_mut(key) {
                if let Some(next) = queue.pop_front() {
                    self.dispatch(next);
                }
                if self.waiting_by_key.get(key).is_some_and(|q| q.is_empty()) {
                    self.waiting_by_key.remove(key);
                }
            }
        }

        if let Some(reason) = outcome.parked {
            self.log(LogLevel::Error, format!("parking workflow: {reason}")).await;
            self.parked = Some(reason);
            return;
        }

        if let Some(entry) = self.inflight.get_mut(&outcome.message_id) {
            entry.pending = entry.pending.saturating_sub(outcome.completed);
            if entry.pending == 0 {
                self.finalize(outcome.message_id).await;
            }
        }
    }

    /// Terminal disposition reached for every lineage of the message:
    /// flush node state, then ack upstream.
    async fn finalize(&mut self, message_id: MessageId) {
        let Some(entry) = self.inflight.remove(&message_id) else {
            return;
        };

        // Node-state write precedes ack. If the store is down we skip the
        // ack; the message will be re-read on the next start.
        let dirty = self.executor.take_dirty_state();
        for (node_id, bytes) in dirty {
            if let Err(err) = self.store.put_node_state(&self.workflow.id, &node_id, &bytes).await
            {
                self.log(
                    LogLevel::Error,
                    format!("node state flush failed for {node_id}: {err}; withholding ack"),
                )
                .await;
                return;
            }
        }

        match entry.ack {
            AckTarget::Source => {
                if let Err(err) = self.source.ack(message_id, entry.offset).await {
                    self.log(LogLevel::Warn, format!("source ack failed: {err}")).await;
                }
            }
            AckTarget::None => {}
        }
    }

    async fn fire_due_delays(&mut self) {
        let now = Instant::now();
        loop {
            let due = self.delays.peek().is_some_and(|Reverse(d)| d.due <= now);
            if !due {
                break;
            }
            let Some(Reverse(lineage)) = self.delays.pop() else {
                break;
            };
            let message_id = lineage.message.id.clone();
            let partition_key = self.partition_key_of(&lineage.message);
            if let Some(entry) = self.inflight.get_mut(&message_id) {
                entry.pending = entry.pending.saturating_sub(1);
            }
            let output = self.walk(&lineage.node_id, "", lineage.message);
            self.apply_walk(message_id, partition_key, output).await;
        }
    }

    fn partition_key_of(&self, message: &PooledMessage) -> Option<String> {
        self.settings
            .partition_key
            .as_deref()
            .and_then(|key| expr::get_path(&message.data, key).map(expr::stringify))
    }

    async fn resume_approval(
        &mut self,
        approval_id: hermod_core::ApprovalId,
        branch: String,
    ) -> EngineResult<()> {
        if !self.suspended.contains_key(&approval_id) {
            return Err(EngineError::UnknownApproval(approval_id));
        }
        self.store.resolve_approval(&approval_id, &branch).await?;
        let Some(lineage) = self.suspended.remove(&approval_id) else {
            return Err(EngineError::UnknownApproval(approval_id));
        };

        let message_id = lineage.message.id.clone();
        let partition_key = self.partition_key_of(&lineage.message);
        if let Some(entry) = self.inflight.get_mut(&message_id) {
            entry.pending = entry.pending.saturating_sub(1);
        }
        let output = self.walk(&lineage.node_id, &branch, lineage.message);
        self.apply_walk(message_id, partition_key, output).await;
        Ok(())
    }

    /// Explicit DLQ drain: pull stored items through the graph now.
    /// Returns the number of items read; their deliveries complete
    /// asynchronously.
    async fn drain_dlq(&mut self) -> EngineResult<u64> {
        let Some(drain) = self.drain_source.as_mut() else {
            return Err(EngineError::NoDlq(self.workflow.id.clone()));
        };
        let mut read = Vec::new();
        while let Some(mut message) = Source::read(&mut **drain, &self.cancel).await? {
            message
                .metadata
                .insert(ORIGIN_KEY.to_string(), ORIGIN_DLQ.to_string());
            read.push(message);
        }
        let count = read.len() as u64;
        for message in read {
            self.process_message(message, AckTarget::None).await;
        }
        info!(workflow = %self.workflow.id, count, "DLQ drain requested");
        Ok(count)
    }

    async fn shutdown(mut self) {
        // Finish in-flight deliveries, bounded by what is left of the drain
        // window.
        let deadline = self
            .drain_deadline
            .unwrap_or_else(|| Instant::now() + Duration::from_millis(self.settings.drain_timeout_ms));
        while !self.deliveries.is_empty() && Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let joined = tokio::time::timeout(remaining, self.deliveries.join_next()).await;
            match joined {
                Ok(Some(Ok(outcome))) => self.handle_outcome(outcome).await,
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_) => break,
            }
        }
        self.deliveries.abort_all();

        // Suspended and delayed messages are not acked; they will be re-read
        // on the next start.
        self.suspended.clear();
        self.delays.clear();
        self.inflight.clear();

        // Flush stateful-node state and the source cursor.
        for (node_id, bytes) in self.executor.take_dirty_state() {
            let _ = self.store.put_node_state(&self.workflow.id, &node_id, &bytes).await;
        }
        let source_state = self.source.state();
        if !source_state.is_empty() {
            if let Ok(bytes) = serde_json::to_vec(&source_state) {
                let _ = self
                    .store
                    .put_node_state(&self.workflow.id, &self.source_node_id, &bytes)
                    .await;
            }
        }

        self.traces.flush(&self.store).await;

        // Close sinks in reverse wire order, then the source.
        for node_id in self.sink_order.iter().rev() {
            if let Some(port) = self.shared.sinks.get(node_id) {
                let mut sink = port.sink.lock().await;
                if let Err(err) = sink.close().await {
                    warn!(workflow = %self.workflow.id, node = %node_id, error = %err, "sink close failed");
                }
            }
        }
        for queue in self.shared.dlqs.values() {
            let mut queue = queue.lock().await;
            let _ = Sink::close(&mut **queue).await;
        }
        if let Some(drain) = self.drain_source.as_mut() {
            let _ = Source::close(&mut **drain).await;
        }
        if let Err(err) = self.source.close().await {
            warn!(workflow = %self.workflow.id, error = %err, "source close failed");
        }

        // The lease is released on every exit path; the reconciler decides
        // what happens next.
        if let Err(err) = self
            .store
            .release_workflow_lease(&self.workflow.id, &self.owner)
            .await
        {
            warn!(workflow = %self.workflow.id, error = %err, "lease release failed");
        }

        let (state, status, detail) = if let Some(reason) = &self.parked {
            (EngineState::Error, WorkflowStatus::Parked, Some(reason.clone()))
        } else if let Some(reason) = &self.fatal {
            (EngineState::Error, WorkflowStatus::Error, Some(reason.clone()))
        } else {
            (EngineState::Stopped, WorkflowStatus::Stopped, None)
        };
        self.report_status(status, detail).await;
        self.set_state(state);
        info!(workflow = %self.workflow.id, %state, "engine stopped");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        // Guarded out by the select precondition.
        None => std::future::pending().await,
    }
}

/// Stable replay key for idempotent sinks.
fn idempotency_key(workflow_id: &hermod_core::WorkflowId, offset: u64, node_id: &NodeId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workflow_id.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(offset.to_be_bytes());
    hasher.update(b":");
    hasher.update(node_id.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Deliver every sink item of one source message: retry with backoff, fall
/// back to the DLQ, park or drop on exhaustion.
async fn run_delivery(shared: Arc<DeliveryShared>, job: DeliveryJob) -> DeliveryOutcome {
    let clock = SystemClock;
    let mut outcome = DeliveryOutcome {
        message_id: job.message_id,
        partition_key: job.partition_key,
        completed: 0,
        parked: None,
        traces: Vec::new(),
    };

    for (node_id, mut message) in job.items {
        let Some(port) = shared.sinks.get(&node_id) else {
            outcome.traces.push(
                TraceStep::new(
                    shared.workflow_id.clone(),
                    message.id.clone(),
                    node_id.clone(),
                    clock.epoch_ms(),
                    TraceOutcome::Failed,
                )
                .with_error("sink not wired".to_string()),
            );
            counters().messages_dropped.fetch_add(1, Ordering::Relaxed);
            outcome.completed += 1;
            continue;
        };

        if shared.settings.idempotency && port.idempotent {
            let key = idempotency_key(&shared.workflow_id, message.offset, &node_id);
            message.metadata.insert(IDEMPOTENCY_KEY.to_string(), key);
        }

        let write_timeout = Duration::from_millis(shared.settings.write_timeout_ms);
        let mut backoff = Backoff::from_millis(shared.settings.retry_base_ms);
        let mut attempt = 0u32;
        let mut last_error = String::new();
        let delivered = loop {
            attempt += 1;
            let result = {
                let mut sink = port.sink.lock().await;
                tokio::time::timeout(write_timeout, sink.write(&message)).await
            };
            match result {
                Ok(Ok(())) => break true,
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("write timed out after {write_timeout:?}"),
            }
            if attempt > shared.settings.max_retries {
                break false;
            }
            counters().sink_retries.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(backoff.next_delay()).await;
        };

        if delivered {
            outcome.traces.push(TraceStep::new(
                shared.workflow_id.clone(),
                message.id.clone(),
                node_id.clone(),
                clock.epoch_ms(),
                TraceOutcome::Delivered,
            ));
            shared.bus.publish_message(&LiveMessage {
                workflow_id: shared.workflow_id.clone(),
                message_id: message.id.clone(),
                node_id: Some(node_id.clone()),
                topic: message.topic.clone(),
                operation: message.operation,
                offset: message.offset,
                at_ms: clock.epoch_ms(),
                data: serde_json::Map::new(),
            });
            outcome.completed += 1;
            continue;
        }

        // Retries exhausted: DLQ, else the workflow's failure policy.
        let dlq = port.dlq.as_ref().and_then(|id| shared.dlqs.get(id));
        match dlq {
            Some(queue) => {
                let result = {
                    let mut queue = queue.lock().await;
                    tokio::time::timeout(write_timeout, Sink::write(&mut **queue, &message)).await
                };
                match result {
                    Ok(Ok(())) => {
                        counters().dlq_writes.fetch_add(1, Ordering::Relaxed);
                        outcome.traces.push(
                            TraceStep::new(
                                shared.workflow_id.clone(),
                                message.id.clone(),
                                node_id.clone(),
                                clock.epoch_ms(),
                                TraceOutcome::DeadLettered,
                            )
                            .with_error(last_error.clone()),
                        );
                        outcome.completed += 1;
                    }
                    Ok(Err(err)) => {
                        outcome.parked = Some(format!(
                            "sink {node_id} exhausted retries and DLQ write failed: {err}"
                        ));
                        break;
                    }
                    Err(_) => {
                        outcome.parked =
                            Some(format!("sink {node_id} exhausted retries and DLQ write timed out"));
                        break;
                    }
                }
            }
            None => match shared.settings.failure_policy {
                hermod_core::FailurePolicy::Park => {
                    outcome.parked = Some(format!(
                        "sink {node_id} failed after {attempt} attempts: {last_error}"
                    ));
                    break;
                }
                hermod_core::FailurePolicy::Drop => {
                    counters().messages_dropped.fetch_add(1, Ordering::Relaxed);
                    outcome.traces.push(
                        TraceStep::new(
                            shared.workflow_id.clone(),
                            message.id.clone(),
                            node_id.clone(),
                            clock.epoch_ms(),
                            TraceOutcome::Failed,
                        )
                        .with_error(last_error.clone()),
                    );
                    outcome.completed += 1;
                }
            },
        }
    }

    outcome
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Desired-state reconciliation.
//!
//! Every tick the worker compares active workflows in the store with the
//! engines it is running: candidates it can lease are started, workflows
//! that are no longer its business are stopped and released, held leases are
//! renewed, and a heartbeat is written. A transient store failure means "no
//! progress this tick"; nothing is torn down on the strength of an error.

use crate::env::EnvConfig;
use crate::gauges;
use crate::identity::WorkerIdentity;
use crate::shard::is_candidate;
use hermod_core::{Clock, SystemClock, WorkflowId, WorkflowStatus};
use hermod_engine::{EngineError, EngineRegistry};
use hermod_store::{MetadataStore, StoreError, WorkflowFilter};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Timing knobs. The TTL must stay well above the period so a few missed
/// ticks cannot drop a held lease (defaults: 60 s vs 5 s).
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub lease_ttl: Duration,
    pub period: Duration,
}

impl ReconcilerConfig {
    pub fn from_env(env: &EnvConfig) -> Self {
        Self { lease_ttl: env.lease_ttl, period: env.reconcile_period }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { lease_ttl: Duration::from_secs(60), period: Duration::from_secs(5) }
    }
}

pub struct Reconciler {
    store: Arc<dyn MetadataStore>,
    engines: Arc<EngineRegistry>,
    identity: WorkerIdentity,
    config: ReconcilerConfig,
    clock: SystemClock,
    /// Workflows that recently failed, with the time of the failure; retried
    /// only after the workflow's `error_backoff`.
    failed_at: Mutex<HashMap<WorkflowId, Instant>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        engines: Arc<EngineRegistry>,
        identity: WorkerIdentity,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            engines,
            identity,
            config,
            clock: SystemClock,
            failed_at: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        &self.engines
    }

    /// Self-register this worker in the store.
    pub async fn register(&self) -> Result<(), ReconcilerError> {
        let mut record = hermod_core::WorkerRecord::new(
            self.identity.guid.clone(),
            self.identity.name.clone(),
            self.identity.endpoint.clone(),
        );
        record.token = self.identity.token.clone();
        self.store.register_worker(&record).await?;
        self.store
            .append_audit(&hermod_core::AuditEntry::new(
                self.clock.epoch_ms(),
                self.identity.guid.as_str(),
                "worker.register",
                self.identity.name.as_str(),
            ))
            .await?;
        info!(guid = %self.identity.guid, ordinal = self.identity.ordinal, "worker registered");
        Ok(())
    }

    /// Startup pass: lease and start every candidate-active workflow.
    /// Workflows leased elsewhere are picked up later when that lease
    /// expires.
    pub async fn initial_sync(&self) {
        self.tick().await;
    }

    /// Reconcile until cancelled, then drain everything.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick().await,
            }
        }
        self.shutdown().await;
    }

    /// One reconciliation pass.
    pub async fn tick(&self) {
        self.engines.sweep_terminal();

        let workflows = match self.store.list_workflows(&WorkflowFilter::default()).await {
            Ok(workflows) => workflows,
            Err(err) if err.is_transient() => {
                warn!(error = %err, "store unavailable; no progress this tick");
                return;
            }
            Err(err) => {
                warn!(error = %err, "workflow snapshot failed");
                return;
            }
        };

        let running: HashSet<WorkflowId> = self.engines.running().into_iter().collect();
        let mut desired: HashSet<WorkflowId> = HashSet::new();

        for workflow in &workflows {
            if !workflow.active || !is_candidate(workflow, &self.identity) {
                continue;
            }
            desired.insert(workflow.id.clone());
            if running.contains(&workflow.id) {
                continue;
            }
            if self.in_error_backoff(workflow) {
                continue;
            }
            self.try_start(workflow).await;
        }

        // Running engines for workflows that were deactivated, deleted, or
        // reassigned: stop and release.
        for id in running.iter().filter(|id| !desired.contains(*id)) {
            info!(workflow = %id, "no longer a candidate; stopping");
            if let Err(err) = self.engines.stop_engine(id).await {
                warn!(workflow = %id, error = %err, "stop failed");
            }
            let _ = self.store.release_workflow_lease(id, &self.identity.guid).await;
        }

        // Renew the leases we still hold. A failed renewal means another
        // worker owns the workflow now; this side stops immediately.
        for id in self.engines.running() {
            if !desired.contains(&id) {
                continue;
            }
            match self
                .store
                .renew_workflow_lease(&id, &self.identity.guid, self.config.lease_ttl)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(workflow = %id, "lease renewal rejected; stopping engine");
                    if let Err(err) = self.engines.stop_engine(&id).await {
                        warn!(workflow = %id, error = %err, "stop after lost lease failed");
                    }
                }
                Err(err) if err.is_transient() => {
                    debug!(workflow = %id, error = %err, "lease renewal deferred");
                }
                Err(err) => {
                    warn!(workflow = %id, error = %err, "lease renewal failed");
                }
            }
        }

        self.heartbeat().await;
    }

    /// A workflow that parked or errored waits out its `error_backoff`
    /// before the next start attempt.
    fn in_error_backoff(&self, workflow: &hermod_core::Workflow) -> bool {
        let backoff = Duration::from_millis(workflow.settings.error_backoff_ms);
        let mut failed_at = self.failed_at.lock();
        match failed_at.get(&workflow.id) {
            Some(at) if at.elapsed() < backoff => true,
            Some(_) => {
                failed_at.remove(&workflow.id);
                false
            }
            None => {
                if matches!(workflow.status, WorkflowStatus::Parked | WorkflowStatus::Error) {
                    // First observation of the failure; start the clock.
                    failed_at.insert(workflow.id.clone(), Instant::now());
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn try_start(&self, workflow: &hermod_core::Workflow) {
        let acquired = match self
            .store
            .acquire_workflow_lease(&workflow.id, &self.identity.guid, self.config.lease_ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(workflow = %workflow.id, error = %err, "lease acquisition failed");
                return;
            }
        };
        if !acquired {
            debug!(workflow = %workflow.id, "lease held elsewhere; skipping");
            return;
        }

        match self.engines.start_workflow(workflow).await {
            Ok(()) => {
                let _ = self
                    .store
                    .append_audit(&hermod_core::AuditEntry::new(
                        self.clock.epoch_ms(),
                        self.identity.guid.as_str(),
                        "workflow.start",
                        workflow.id.as_str(),
                    ))
                    .await;
            }
            Err(EngineError::AlreadyRunning(_)) => {}
            Err(err) => {
                warn!(workflow = %workflow.id, error = %err, "engine start failed");
                self.failed_at.lock().insert(workflow.id.clone(), Instant::now());
                let _ = self
                    .store
                    .release_workflow_lease(&workflow.id, &self.identity.guid)
                    .await;
            }
        }
    }

    async fn heartbeat(&self) {
        let gauges = gauges::sample();
        if let Err(err) = self
            .store
            .update_worker_heartbeat(&self.identity.guid, gauges.cpu_percent, gauges.mem_percent)
            .await
        {
            warn!(error = %err, "heartbeat failed");
        }
    }

    /// Stop all engines in parallel and release anything still leased to us.
    pub async fn shutdown(&self) {
        info!(guid = %self.identity.guid, "worker shutting down");
        self.engines.stop_all().await;

        // Engines release their leases on drain; sweep up any leftovers
        // (e.g. engines that never finished starting).
        if let Ok(workflows) = self.store.list_workflows(&WorkflowFilter::default()).await {
            for workflow in workflows {
                if workflow.owner_id.as_ref() == Some(&self.identity.guid) {
                    let _ = self
                        .store
                        .release_workflow_lease(&workflow.id, &self.identity.guid)
                        .await;
                }
            }
        }

        let _ = self
            .store
            .append_audit(&hermod_core::AuditEntry::new(
                self.clock.epoch_ms(),
                self.identity.guid.as_str(),
                "worker.shutdown",
                self.identity.name.as_str(),
            ))
            .await;
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;

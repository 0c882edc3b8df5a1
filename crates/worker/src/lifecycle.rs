// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker process lifecycle: startup, run, graceful shutdown.

use crate::env::EnvConfig;
use crate::identity::WorkerIdentity;
use crate::readiness::ReadinessEvaluator;
use crate::reconciler::{Reconciler, ReconcilerConfig, ReconcilerError};
use hermod_adapters::{register_outbox_sink, AdapterRegistry};
use hermod_engine::{EngineRegistry, LiveEventBus};
use hermod_store::MetadataStore;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("worker registration failed: {0}")]
    Registration(#[from] ReconcilerError),
}

/// A running worker: reconciler loop plus the shared registries.
pub struct Worker {
    reconciler: Arc<Reconciler>,
    readiness: Arc<ReadinessEvaluator>,
    cancel: CancellationToken,
    run_task: tokio::task::JoinHandle<()>,
}

/// Wire up the worker and bring it to steady state.
///
/// Registers the worker, performs the initial sync, and spawns the
/// reconciliation loop. Failure here is an initialization failure; the
/// binary exits 1.
pub async fn startup(
    store: Arc<dyn MetadataStore>,
    identity: WorkerIdentity,
    env: EnvConfig,
) -> Result<Worker, LifecycleError> {
    let mut adapters = AdapterRegistry::with_builtins();
    register_outbox_sink(&mut adapters, store.clone());
    let adapters = Arc::new(adapters);

    let bus = Arc::new(LiveEventBus::new());
    let engines = Arc::new(EngineRegistry::new(
        store.clone(),
        adapters,
        bus,
        identity.guid.clone(),
    ));
    let readiness = Arc::new(ReadinessEvaluator::new(
        store.clone(),
        env.ready_debounce,
        env.ready_leases_required,
    ));
    let reconciler = Arc::new(Reconciler::new(
        store,
        engines,
        identity,
        ReconcilerConfig::from_env(&env),
    ));

    reconciler.register().await?;
    reconciler.initial_sync().await;

    let cancel = CancellationToken::new();
    let run_task = {
        let reconciler = reconciler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    info!(guid = %reconciler.identity().guid, "worker started");
    Ok(Worker { reconciler, readiness, cancel, run_task })
}

impl Worker {
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn engines(&self) -> &Arc<EngineRegistry> {
        self.reconciler.engines()
    }

    /// `/readyz` backing evaluator; the control plane serializes its report.
    pub fn readiness(&self) -> &Arc<ReadinessEvaluator> {
        &self.readiness
    }

    /// Cancel the loop and drain every engine.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        // The loop's final act is Reconciler::shutdown.
        let _ = self.run_task.await;
        info!("worker stopped");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;

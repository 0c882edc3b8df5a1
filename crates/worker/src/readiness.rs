// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet health evaluation backing `/readyz`.
//!
//! The evaluator samples the store independently of the reconciler. A
//! debounce window reuses the previous report so transient store hiccups do
//! not flap readiness, and lease failures only gate the overall status when
//! explicitly required.

use hermod_core::{Clock, SystemClock, DEFAULT_WORKER_TTL_MS};
use hermod_store::{MetadataStore, WorkerFilter, WorkflowFilter};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Overall or per-check verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyStatus {
    Ok,
    Error,
}

/// One entry of the per-check dictionary.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub status: ReadyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Workers seen within the TTL (workers check only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<usize>,
}

impl CheckResult {
    fn ok() -> Self {
        Self { status: ReadyStatus::Ok, detail: None, recent: None, stale: None }
    }

    fn error(detail: impl Into<String>) -> Self {
        Self {
            status: ReadyStatus::Error,
            detail: Some(detail.into()),
            recent: None,
            stale: None,
        }
    }
}

/// The `/readyz` body.
#[derive(Debug, Clone, Serialize)]
pub struct ReadyReport {
    pub version: String,
    pub status: ReadyStatus,
    pub checks: IndexMap<String, CheckResult>,
}

impl ReadyReport {
    pub fn is_ok(&self) -> bool {
        self.status == ReadyStatus::Ok
    }
}

pub struct ReadinessEvaluator<C: Clock = SystemClock> {
    store: Arc<dyn MetadataStore>,
    clock: C,
    debounce: Duration,
    leases_required: bool,
    worker_ttl_ms: u64,
    cached: Mutex<Option<(Instant, ReadyReport)>>,
}

impl ReadinessEvaluator<SystemClock> {
    pub fn new(store: Arc<dyn MetadataStore>, debounce: Duration, leases_required: bool) -> Self {
        Self::with_clock(store, debounce, leases_required, SystemClock)
    }
}

impl<C: Clock> ReadinessEvaluator<C> {
    pub fn with_clock(
        store: Arc<dyn MetadataStore>,
        debounce: Duration,
        leases_required: bool,
        clock: C,
    ) -> Self {
        Self {
            store,
            clock,
            debounce,
            leases_required,
            worker_ttl_ms: DEFAULT_WORKER_TTL_MS,
            cached: Mutex::new(None),
        }
    }

    /// Evaluate fleet health, reusing a cached report inside the debounce
    /// window.
    pub async fn evaluate(&self) -> ReadyReport {
        if self.debounce > Duration::ZERO {
            let cached = self.cached.lock();
            if let Some((at, report)) = cached.as_ref() {
                if self.clock.now().duration_since(*at) < self.debounce {
                    return report.clone();
                }
            }
        }

        let report = self.evaluate_fresh().await;
        *self.cached.lock() = Some((self.clock.now(), report.clone()));
        report
    }

    async fn evaluate_fresh(&self) -> ReadyReport {
        let mut checks = IndexMap::new();
        let now_ms = self.clock.epoch_ms();

        // database: a cheap list query must succeed.
        let workers = self.store.list_workers(&WorkerFilter::default()).await;
        let database_ok = workers.is_ok();
        match &workers {
            Ok(_) => {
                checks.insert("database".to_string(), CheckResult::ok());
            }
            Err(err) => {
                checks.insert("database".to_string(), CheckResult::error(err.to_string()));
            }
        }

        // workers: recent vs stale against the TTL.
        if let Ok(workers) = &workers {
            let stale = workers.iter().filter(|w| w.is_stale(now_ms, self.worker_ttl_ms)).count();
            let recent = workers.len() - stale;
            checks.insert(
                "workers".to_string(),
                CheckResult {
                    status: ReadyStatus::Ok,
                    detail: None,
                    recent: Some(recent),
                    stale: Some(stale),
                },
            );
        }

        // leases: every active workflow must be validly leased.
        let mut leases_ok = true;
        match self.store.list_workflows(&WorkflowFilter::active()).await {
            Ok(workflows) => {
                let unleased: Vec<String> = workflows
                    .iter()
                    .filter(|wf| !wf.has_valid_lease(now_ms))
                    .map(|wf| wf.id.to_string())
                    .collect();
                if unleased.is_empty() {
                    checks.insert("leases".to_string(), CheckResult::ok());
                } else {
                    leases_ok = false;
                    checks.insert(
                        "leases".to_string(),
                        CheckResult::error(format!("unleased: {}", unleased.join(", "))),
                    );
                }
            }
            Err(err) => {
                leases_ok = false;
                checks.insert("leases".to_string(), CheckResult::error(err.to_string()));
            }
        }

        let gated = !database_ok || (self.leases_required && !leases_ok);
        ReadyReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: if gated { ReadyStatus::Error } else { ReadyStatus::Ok },
            checks,
        }
    }
}

#[cfg(test)]
#[path = "readiness_tests.rs"]
mod tests;

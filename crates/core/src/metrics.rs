// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide engine counters.
//!
//! Init-once singletons shared by every engine in the process. Tests use the
//! gated [`EngineCounters::reset`] hook; production code only increments.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineCounters {
    pub messages_processed: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub sink_retries: AtomicU64,
    pub dlq_writes: AtomicU64,
    pub executor_errors: AtomicU64,
    pub approvals_suspended: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub messages_processed: u64,
    pub messages_dropped: u64,
    pub sink_retries: u64,
    pub dlq_writes: u64,
    pub executor_errors: u64,
    pub approvals_suspended: u64,
}

static COUNTERS: EngineCounters = EngineCounters {
    messages_processed: AtomicU64::new(0),
    messages_dropped: AtomicU64::new(0),
    sink_retries: AtomicU64::new(0),
    dlq_writes: AtomicU64::new(0),
    executor_errors: AtomicU64::new(0),
    approvals_suspended: AtomicU64::new(0),
};

/// The process-wide counter set.
pub fn counters() -> &'static EngineCounters {
    &COUNTERS
}

impl EngineCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            sink_retries: self.sink_retries.load(Ordering::Relaxed),
            dlq_writes: self.dlq_writes.load(Ordering::Relaxed),
            executor_errors: self.executor_errors.load(Ordering::Relaxed),
            approvals_suspended: self.approvals_suspended.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Test hook only.
    #[cfg(any(test, feature = "test-support"))]
    pub fn reset(&self) {
        self.messages_processed.store(0, Ordering::Relaxed);
        self.messages_dropped.store(0, Ordering::Relaxed);
        self.sink_retries.store(0, Ordering::Relaxed);
        self.dlq_writes.store(0, Ordering::Relaxed);
        self.executor_errors.store(0, Ordering::Relaxed);
        self.approvals_suspended.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;

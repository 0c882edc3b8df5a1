// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time source for lease and heartbeat arithmetic.
//!
//! Leases expire and workers go stale by comparing epoch-millisecond stamps,
//! and readiness debounce works on monotonic instants. Both views hang off
//! one trait so the store, the reconciler, and the readiness evaluator can
//! run against a controllable clock in tests instead of sleeping through
//! TTLs.

#[cfg(any(test, feature = "test-support"))]
use parking_lot::Mutex;
#[cfg(any(test, feature = "test-support"))]
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A clock that provides the current time.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Milliseconds since the Unix epoch; the stamp stored in lease and
    /// heartbeat fields.
    fn epoch_ms(&self) -> u64;

    /// Monotonic instant for debounce windows and backoff arithmetic.
    fn now(&self) -> Instant;

    /// Expiry stamp for a lease taken now with the given TTL.
    fn lease_deadline_ms(&self, ttl: Duration) -> u64 {
        self.epoch_ms().saturating_add(ttl.as_millis() as u64)
    }

    /// Whether a stored stamp (a `lease_until`, a heartbeat deadline) has
    /// passed. A stamp exactly at the current instant counts as expired.
    fn has_expired_ms(&self, deadline_ms: u64) -> bool {
        deadline_ms <= self.epoch_ms()
    }
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_millis() as u64)
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Controllable clock for lease-expiry and debounce tests. Clones share one
/// timeline; advancing any handle moves both the epoch and monotonic views.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone)]
pub struct FakeClock {
    timeline: Arc<Mutex<Timeline>>,
}

#[cfg(any(test, feature = "test-support"))]
struct Timeline {
    epoch_ms: u64,
    instant: Instant,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeClock {
    pub fn new() -> Self {
        Self::at_epoch_ms(1_000_000)
    }

    pub fn at_epoch_ms(epoch_ms: u64) -> Self {
        Self {
            timeline: Arc::new(Mutex::new(Timeline { epoch_ms, instant: Instant::now() })),
        }
    }

    /// Move the shared timeline forward.
    pub fn advance(&self, by: Duration) {
        let mut timeline = self.timeline.lock();
        timeline.epoch_ms += by.as_millis() as u64;
        timeline.instant += by;
    }

    pub fn set_epoch_ms(&self, epoch_ms: u64) {
        self.timeline.lock().epoch_ms = epoch_ms;
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Clock for FakeClock {
    fn epoch_ms(&self) -> u64 {
        self.timeline.lock().epoch_ms
    }

    fn now(&self) -> Instant {
        self.timeline.lock().instant
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;

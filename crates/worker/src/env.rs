// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment configuration for the worker process.

use std::time::Duration;

/// Lease TTL when none is configured. Must stay well above the
/// reconciliation period so a missed tick cannot drop a lease.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);
/// Reconciliation period when none is configured.
pub const DEFAULT_RECONCILE_PERIOD: Duration = Duration::from_secs(5);

/// Settings read from `HERMOD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// `HERMOD_READY_DEBOUNCE`: reuse a readiness result younger than this.
    pub ready_debounce: Duration,
    /// `HERMOD_READY_LEASES_REQUIRED`: lease failures gate readiness.
    pub ready_leases_required: bool,
    /// `HERMOD_ENV=production` tightens origin checks in the control plane.
    pub production: bool,
    /// `HERMOD_LEASE_TTL_SECS` override hook.
    pub lease_ttl: Duration,
    /// `HERMOD_RECONCILE_SECS` override hook.
    pub reconcile_period: Duration,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            ready_debounce: Duration::ZERO,
            ready_leases_required: false,
            production: false,
            lease_ttl: DEFAULT_LEASE_TTL,
            reconcile_period: DEFAULT_RECONCILE_PERIOD,
        }
    }
}

impl EnvConfig {
    /// Read the process environment.
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("HERMOD_READY_DEBOUNCE") {
            if let Some(duration) = parse_duration(&raw) {
                config.ready_debounce = duration;
            }
        }
        config.ready_leases_required = env_flag("HERMOD_READY_LEASES_REQUIRED");
        config.production = std::env::var("HERMOD_ENV")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false);
        if let Some(secs) = env_u64("HERMOD_LEASE_TTL_SECS") {
            config.lease_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("HERMOD_RECONCILE_SECS") {
            config.reconcile_period = Duration::from_secs(secs);
        }
        config
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// `"500ms"`, `"2s"`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return secs.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    raw.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;

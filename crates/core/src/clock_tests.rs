// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_advances() {
    let clock = SystemClock;
    let a = clock.now();
    let b = clock.now();
    assert!(b >= a);
    assert!(clock.epoch_ms() > 0);
}

#[test]
fn fake_clock_starts_at_known_epoch() {
    assert_eq!(FakeClock::new().epoch_ms(), 1_000_000);
    assert_eq!(FakeClock::at_epoch_ms(42).epoch_ms(), 42);
}

#[test]
fn fake_clock_advance_moves_both_views() {
    let clock = FakeClock::new();
    let start = clock.now();
    clock.advance(Duration::from_secs(30));
    assert_eq!(clock.now().duration_since(start), Duration::from_secs(30));
    assert_eq!(clock.epoch_ms(), 1_000_000 + 30_000);
}

#[test]
fn fake_clock_clones_share_the_timeline() {
    let clock = FakeClock::new();
    let other = clock.clone();
    clock.advance(Duration::from_millis(250));
    assert_eq!(other.epoch_ms(), clock.epoch_ms());
    assert_eq!(other.now(), clock.now());
}

#[test]
fn fake_clock_set_epoch() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42);
    assert_eq!(clock.epoch_ms(), 42);
}

#[test]
fn lease_deadline_lands_ttl_past_now() {
    let clock = FakeClock::at_epoch_ms(10_000);
    assert_eq!(clock.lease_deadline_ms(Duration::from_secs(60)), 70_000);
}

#[test]
fn lease_expiry_is_inclusive_at_the_deadline() {
    let clock = FakeClock::at_epoch_ms(10_000);
    let deadline = clock.lease_deadline_ms(Duration::from_secs(1));

    assert!(!clock.has_expired_ms(deadline));
    clock.advance(Duration::from_millis(999));
    assert!(!clock.has_expired_ms(deadline));
    clock.advance(Duration::from_millis(1));
    assert!(clock.has_expired_ms(deadline));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn backoff_doubles_from_base() {
    let mut backoff = Backoff::from_millis(50);
    assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    assert_eq!(backoff.attempts(), 3);
}

#[test]
fn backoff_caps_at_five_seconds() {
    let mut backoff = Backoff::from_millis(1_000);
    for _ in 0..10 {
        assert!(backoff.next_delay() <= Duration::from_secs(5));
    }
}

#[test]
fn deep_attempt_counts_do_not_overflow() {
    let mut backoff = Backoff::from_millis(10);
    for _ in 0..100 {
        let _ = backoff.next_delay();
    }
    assert_eq!(backoff.next_delay(), Duration::from_secs(5));
}

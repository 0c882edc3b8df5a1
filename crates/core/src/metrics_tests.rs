// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn counters_accumulate_and_snapshot() {
    let before = counters().snapshot();
    counters().messages_processed.fetch_add(3, Ordering::Relaxed);
    counters().dlq_writes.fetch_add(1, Ordering::Relaxed);
    let after = counters().snapshot();
    assert!(after.messages_processed >= before.messages_processed + 3);
    assert!(after.dlq_writes >= before.dlq_writes + 1);
}

#[test]
fn snapshot_roundtrips_through_json() {
    let snap = CounterSnapshot { messages_processed: 5, ..Default::default() };
    let json = serde_json::to_string(&snap).unwrap();
    let parsed: CounterSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, snap);
}

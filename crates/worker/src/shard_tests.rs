// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_core::{WorkerGuid, WorkflowBuilder};
use proptest::prelude::*;

fn identity(ordinal: u32, total: u32) -> WorkerIdentity {
    WorkerIdentity::new(WorkerGuid::new(format!("guid-{ordinal}")), ordinal, total)
}

#[test]
fn fnv1a64_matches_known_vectors() {
    // Reference values for the 64-bit FNV-1a parameters.
    assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
    assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    assert_eq!(fnv1a64(b"foobar"), 0x85944171f73967e8);
}

#[test]
fn shard_is_deterministic() {
    let id = WorkflowId::new("orders-cdc");
    assert_eq!(shard_of(&id, 4), shard_of(&id, 4));
}

#[test]
fn single_worker_owns_everything() {
    let identity = identity(0, 1);
    for name in ["a", "b", "c"] {
        let wf = WorkflowBuilder::source_to_sink(name, "s", "k").build();
        assert!(is_candidate(&wf, &identity));
    }
}

#[test]
fn explicit_assignment_overrides_hash() {
    let ours = identity(0, 4);
    let wf = WorkflowBuilder::source_to_sink("wf-x", "s", "k")
        .assigned_to(WorkerGuid::new("guid-0"))
        .build();
    // Candidate here regardless of where the hash points.
    assert!(is_candidate(&wf, &ours));

    let theirs = WorkflowBuilder::source_to_sink("wf-x", "s", "k")
        .assigned_to(WorkerGuid::new("guid-9"))
        .build();
    assert!(!is_candidate(&theirs, &ours));
}

proptest! {
    /// The candidate sets of the N ordinals partition the workflow id space:
    /// every id has exactly one candidate worker.
    #[test]
    fn candidacy_partitions_ids(id in "[a-z0-9-]{1,32}", total in 1u32..8) {
        let wf = WorkflowBuilder::source_to_sink(id.as_str(), "s", "k").build();
        let candidates = (0..total)
            .filter(|&ordinal| {
                let identity = WorkerIdentity::new(
                    WorkerGuid::new(format!("guid-{ordinal}")),
                    ordinal,
                    total,
                );
                is_candidate(&wf, &identity)
            })
            .count();
        prop_assert_eq!(candidates, 1);
    }
}

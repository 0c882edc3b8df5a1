// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_core::{CompareOp, Node, PooledMessage};
use indexmap::IndexMap;
use serde_json::json;

fn message(data: serde_json::Value) -> PooledMessage {
    let mut msg = PooledMessage::new();
    if let serde_json::Value::Object(map) = data {
        msg.data = map;
    }
    msg
}

fn mapping(entries: &[(&str, &str)]) -> Node {
    let mut map = IndexMap::new();
    for (k, v) in entries {
        map.insert(k.to_string(), v.to_string());
    }
    Node::new("map", NodeKind::Transformation(TransformConfig::Mapping { map }))
}

#[test]
fn mapping_writes_dotted_paths() {
    let mut exec = NodeExecutor::new();
    let node = mapping(&[
        ("column.customer.name", "{name}"),
        ("column.greeting", "hi {name}"),
    ]);
    let msg = message(json!({"name": "Ada"}));

    let outcome = exec.execute(&node, msg).unwrap();
    let ExecOutcome::Emit(branch, out) = outcome else {
        panic!("expected emit");
    };
    assert_eq!(branch, "");
    assert_eq!(out.data["customer"]["name"], json!("Ada"));
    assert_eq!(out.data["greeting"], json!("hi Ada"));
}

#[test]
fn mapping_without_column_prefix_writes_top_level() {
    let mut exec = NodeExecutor::new();
    let node = mapping(&[("total", "{amount}")]);
    let msg = message(json!({"amount": 3}));
    let ExecOutcome::Emit(_, out) = exec.execute(&node, msg).unwrap() else {
        panic!("expected emit");
    };
    assert_eq!(out.data["total"], json!(3));
}

#[test]
fn filter_keeps_matching_messages() {
    let mut exec = NodeExecutor::new();
    let node = Node::new(
        "filter",
        NodeKind::Transformation(TransformConfig::FilterData {
            field: "status".into(),
            op: CompareOp::Eq,
            value: json!("paid"),
        }),
    );
    let keep = exec.execute(&node, message(json!({"status": "paid"}))).unwrap();
    assert!(matches!(keep, ExecOutcome::Emit(_, _)));

    let drop = exec.execute(&node, message(json!({"status": "new"}))).unwrap();
    assert!(matches!(drop, ExecOutcome::Drop));
}

#[test]
fn filter_on_missing_field_compares_null() {
    let mut exec = NodeExecutor::new();
    let node = Node::new(
        "filter",
        NodeKind::Transformation(TransformConfig::FilterData {
            field: "missing".into(),
            op: CompareOp::Ne,
            value: json!("x"),
        }),
    );
    let outcome = exec.execute(&node, message(json!({}))).unwrap();
    assert!(matches!(outcome, ExecOutcome::Emit(_, _)));
}

#[test]
fn condition_emits_true_false_branches() {
    let mut exec = NodeExecutor::new();
    let node = Node::new(
        "cond",
        NodeKind::Condition { field: "n".into(), op: CompareOp::Gt, value: json!(10) },
    );

    let ExecOutcome::Emit(branch, _) = exec.execute(&node, message(json!({"n": 11}))).unwrap()
    else {
        panic!("expected emit");
    };
    assert_eq!(branch, BRANCH_TRUE);

    let ExecOutcome::Emit(branch, _) = exec.execute(&node, message(json!({"n": 9}))).unwrap()
    else {
        panic!("expected emit");
    };
    assert_eq!(branch, BRANCH_FALSE);
}

#[test]
fn condition_expr_error_is_a_data_error() {
    let mut exec = NodeExecutor::new();
    let node = Node::new(
        "cond",
        NodeKind::Condition { field: "n".into(), op: CompareOp::Regex, value: json!("(") },
    );
    let err = exec.execute(&node, message(json!({"n": "x"}))).unwrap_err();
    assert!(matches!(err, ExecError::Expr { .. }));
}

#[test]
fn router_branches_on_field_value() {
    let mut exec = NodeExecutor::new();
    let node = Node::new("route", NodeKind::Router { field: "region".into() });
    let ExecOutcome::Emit(branch, _) =
        exec.execute(&node, message(json!({"region": "eu"}))).unwrap()
    else {
        panic!("expected emit");
    };
    assert_eq!(branch, "eu");
}

#[test]
fn router_missing_field_uses_default_branch() {
    let mut exec = NodeExecutor::new();
    let node = Node::new("route", NodeKind::Router { field: "region".into() });
    let ExecOutcome::Emit(branch, _) = exec.execute(&node, message(json!({}))).unwrap() else {
        panic!("expected emit");
    };
    assert_eq!(branch, "");
}

#[test]
fn approval_suspends() {
    let mut exec = NodeExecutor::new();
    let node = Node::new("gate", NodeKind::Approval);
    let outcome = exec.execute(&node, message(json!({}))).unwrap();
    assert!(matches!(outcome, ExecOutcome::Suspend(_)));
}

#[test]
fn delay_schedules_continuation() {
    let mut exec = NodeExecutor::new();
    let node = Node::new("wait", NodeKind::Delay { duration_ms: 250 });
    let outcome = exec.execute(&node, message(json!({}))).unwrap();
    let ExecOutcome::Delay { after_ms, .. } = outcome else {
        panic!("expected delay");
    };
    assert_eq!(after_ms, 250);
}

#[test]
fn dedup_drops_repeats_within_capacity() {
    let mut exec = NodeExecutor::new();
    let node = Node::new(
        "dedup",
        NodeKind::Transformation(TransformConfig::Dedup { field: "id".into(), capacity: 8 }),
    );

    let first = exec.execute(&node, message(json!({"id": "a"}))).unwrap();
    assert!(matches!(first, ExecOutcome::Emit(_, _)));
    let repeat = exec.execute(&node, message(json!({"id": "a"}))).unwrap();
    assert!(matches!(repeat, ExecOutcome::Drop));
    let other = exec.execute(&node, message(json!({"id": "b"}))).unwrap();
    assert!(matches!(other, ExecOutcome::Emit(_, _)));
}

#[test]
fn dedup_evicts_oldest_at_capacity() {
    let mut exec = NodeExecutor::new();
    let node = Node::new(
        "dedup",
        NodeKind::Transformation(TransformConfig::Dedup { field: "id".into(), capacity: 2 }),
    );
    for id in ["a", "b", "c"] {
        let outcome = exec.execute(&node, message(json!({ "id": id }))).unwrap();
        assert!(matches!(outcome, ExecOutcome::Emit(_, _)));
    }
    // "a" was evicted by "c" and is admitted again.
    let readmitted = exec.execute(&node, message(json!({"id": "a"}))).unwrap();
    assert!(matches!(readmitted, ExecOutcome::Emit(_, _)));
}

#[test]
fn dedup_state_survives_seed_roundtrip() {
    let node = Node::new(
        "dedup",
        NodeKind::Transformation(TransformConfig::Dedup { field: "id".into(), capacity: 8 }),
    );

    let mut exec = NodeExecutor::new();
    let _ = exec.execute(&node, message(json!({"id": "a"}))).unwrap();
    let dirty = exec.take_dirty_state();
    assert_eq!(dirty.len(), 1);
    let (node_id, bytes) = &dirty[0];
    assert_eq!(node_id.as_str(), "dedup");

    // A fresh executor seeded with the persisted window keeps dropping "a".
    let mut fresh = NodeExecutor::new();
    fresh.seed_state(&node, bytes);
    let outcome = fresh.execute(&node, message(json!({"id": "a"}))).unwrap();
    assert!(matches!(outcome, ExecOutcome::Drop));
}

#[test]
fn dedup_missing_field_is_a_data_error() {
    let mut exec = NodeExecutor::new();
    let node = Node::new(
        "dedup",
        NodeKind::Transformation(TransformConfig::Dedup { field: "id".into(), capacity: 8 }),
    );
    let err = exec.execute(&node, message(json!({}))).unwrap_err();
    assert!(matches!(err, ExecError::MissingField { .. }));
}

#[test]
fn take_dirty_state_clears_the_flag() {
    let node = Node::new(
        "dedup",
        NodeKind::Transformation(TransformConfig::Dedup { field: "id".into(), capacity: 8 }),
    );
    let mut exec = NodeExecutor::new();
    let _ = exec.execute(&node, message(json!({"id": "a"}))).unwrap();
    assert_eq!(exec.take_dirty_state().len(), 1);
    assert!(exec.take_dirty_state().is_empty());
}

#[test]
fn executor_rejects_terminal_nodes() {
    let mut exec = NodeExecutor::new();
    let node = Node::new("src", NodeKind::Source { endpoint: "ep".into() });
    let err = exec.execute(&node, message(json!({}))).unwrap_err();
    assert!(matches!(err, ExecError::WrongKind { .. }));
}

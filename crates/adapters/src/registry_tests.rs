// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_core::Endpoint;

#[test]
fn builtins_resolve_memory_kinds() {
    let registry = AdapterRegistry::with_builtins();
    assert!(registry.build_source(&Endpoint::new("ep-in", "memory")).is_ok());
    assert!(registry.build_sink(&Endpoint::new("ep-out", "memory")).is_ok());
    assert!(registry.build_queue(&Endpoint::new("ep-dlq", "memory")).is_ok());
    assert!(registry.build_sink(&Endpoint::new("ep-q", "memory-queue")).is_ok());
}

#[test]
fn unknown_kind_is_a_config_error() {
    let registry = AdapterRegistry::with_builtins();
    let err = match registry.build_source(&Endpoint::new("ep", "kafka")) {
        Ok(_) => panic!("expected unknown adapter kind to be rejected"),
        Err(err) => err,
    };
    assert!(matches!(err, AdapterError::Config(_)));
    assert!(!err.is_transient());
}

#[test]
fn inactive_endpoint_is_a_config_error() {
    let registry = AdapterRegistry::with_builtins();
    let mut endpoint = Endpoint::new("ep", "memory");
    endpoint.active = false;
    let err = match registry.build_sink(&endpoint) {
        Ok(_) => panic!("expected inactive endpoint to be rejected"),
        Err(err) => err,
    };
    assert!(matches!(err, AdapterError::Config(_)));
}

#[test]
fn dlq_requires_a_replay_queue_kind() {
    let mut registry = AdapterRegistry::with_builtins();
    // A sink-only kind cannot back a DLQ.
    registry.register_sink("webhook", |_| {
        Err(AdapterError::Config("unreachable in this test".to_string()))
    });
    let err = match registry.build_queue(&Endpoint::new("ep", "webhook")) {
        Ok(_) => panic!("expected a sink-only kind to be rejected as a DLQ"),
        Err(err) => err,
    };
    assert!(matches!(err, AdapterError::Config(_)));
}

#[tokio::test]
async fn adapters_built_from_one_registry_share_hub_state() {
    let registry = AdapterRegistry::with_builtins();
    registry
        .memory_hub()
        .source("ep-in")
        .push("t", hermod_core::Operation::Create, serde_json::json!({"x": 1}));

    let mut source = registry.build_source(&Endpoint::new("ep-in", "memory")).unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();
    source.open().await.unwrap();
    let msg = source.read(&cancel).await.unwrap().unwrap();
    assert_eq!(msg.data["x"], serde_json::json!(1));
}

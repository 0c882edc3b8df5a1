// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hermod_core::{OutboxStatus, PooledMessage};
use hermod_store::{MemoryStore, MetadataStore};
use serde_json::json;

#[tokio::test]
async fn write_stages_a_pending_item() {
    let store = Arc::new(MemoryStore::new());
    let mut sink = OutboxSink::new(store.clone());

    let mut msg = PooledMessage::new();
    msg.data.insert("order".into(), json!(7));
    sink.write(&msg).await.unwrap();

    let items = store.list_outbox_items(Some(OutboxStatus::Pending)).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].attempts, 0);
    let decoded: serde_json::Value = serde_json::from_slice(&items[0].payload).unwrap();
    assert_eq!(decoded["order"], json!(7));
}

#[tokio::test]
async fn write_prefers_raw_payload_bytes() {
    let store = Arc::new(MemoryStore::new());
    let mut sink = OutboxSink::new(store.clone());

    let mut msg = PooledMessage::new();
    msg.payload.extend_from_slice(b"raw-bytes");
    msg.data.insert("ignored".into(), json!(true));
    sink.write(&msg).await.unwrap();

    let items = store.list_outbox_items(None).await.unwrap();
    assert_eq!(items[0].payload, b"raw-bytes");
}

#[tokio::test]
async fn registered_kind_builds_through_the_registry() {
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
    let mut registry = AdapterRegistry::with_builtins();
    register_outbox_sink(&mut registry, store);
    assert!(registry
        .build_sink(&hermod_core::Endpoint::new("ep-obx", "outbox"))
        .is_ok());
}

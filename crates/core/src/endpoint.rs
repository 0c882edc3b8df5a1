// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source/sink endpoint records.

use crate::define_name_id;
use crate::id::Vhost;
use serde::{Deserialize, Serialize};

define_name_id! {
    /// Endpoint identifier, assigned by the control plane.
    pub struct EndpointId;
}

/// A configured source or sink.
///
/// `kind` is the type discriminator the adapter registry resolves
/// constructors by. The configuration map is opaque here; each adapter
/// interprets its own keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    #[serde(default)]
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub vhost: Vhost,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Sinks only: the sink deduplicates on replay when given an
    /// idempotency key.
    #[serde(default)]
    pub idempotent: bool,
    /// Sinks only: dead-letter queue endpoint for failed deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dlq: Option<EndpointId>,
}

fn default_active() -> bool {
    true
}

impl Endpoint {
    pub fn new(id: impl Into<EndpointId>, kind: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.as_str().to_string(),
            id,
            kind: kind.into(),
            config: serde_json::Map::new(),
            vhost: Vhost::default(),
            active: true,
            idempotent: false,
            dlq: None,
        }
    }

    pub fn with_config(mut self, key: &str, value: serde_json::Value) -> Self {
        self.config.insert(key.to_string(), value);
        self
    }

    pub fn with_dlq(mut self, dlq: impl Into<EndpointId>) -> Self {
        self.dlq = Some(dlq.into());
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// String-typed config accessor.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }
}

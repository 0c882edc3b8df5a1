// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter registry: type discriminator → constructor.
//!
//! The engine resolves `Endpoint` records through this registry at start
//! time. An unknown kind or an inactive endpoint is a configuration error,
//! never retried.

use crate::error::{AdapterError, AdapterResult};
use crate::memory::MemoryHub;
use crate::sink::{ReplayQueue, Sink};
use crate::source::Source;
use hermod_core::Endpoint;
use std::collections::HashMap;
use std::sync::Arc;

type SourceCtor = Arc<dyn Fn(&Endpoint) -> AdapterResult<Box<dyn Source>> + Send + Sync>;
type SinkCtor = Arc<dyn Fn(&Endpoint) -> AdapterResult<Box<dyn Sink>> + Send + Sync>;
type QueueCtor = Arc<dyn Fn(&Endpoint) -> AdapterResult<Box<dyn ReplayQueue>> + Send + Sync>;

/// Factory from endpoint records to adapter instances.
pub struct AdapterRegistry {
    sources: HashMap<String, SourceCtor>,
    sinks: HashMap<String, SinkCtor>,
    queues: HashMap<String, QueueCtor>,
    hub: MemoryHub,
}

impl AdapterRegistry {
    /// Empty registry; callers register every kind themselves.
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            sinks: HashMap::new(),
            queues: HashMap::new(),
            hub: MemoryHub::new(),
        }
    }

    /// Registry with the built-in `memory` source, sink, and queue kinds
    /// wired to a fresh hub.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let hub = registry.hub.clone();
        registry.register_source("memory", {
            let hub = hub.clone();
            move |endpoint| Ok(Box::new(hub.build_source(endpoint.id.as_str())) as Box<dyn Source>)
        });
        registry.register_sink("memory", {
            let hub = hub.clone();
            move |endpoint| Ok(Box::new(hub.build_sink(endpoint.id.as_str())) as Box<dyn Sink>)
        });
        registry.register_queue("memory", {
            let hub = hub.clone();
            move |endpoint| {
                Ok(Box::new(hub.build_queue(endpoint.id.as_str())) as Box<dyn ReplayQueue>)
            }
        });
        // A queue endpoint can also terminate a graph directly.
        registry.register_sink("memory-queue", {
            let hub = hub.clone();
            move |endpoint| Ok(Box::new(hub.build_queue(endpoint.id.as_str())) as Box<dyn Sink>)
        });
        registry.register_queue("memory-queue", {
            let hub = hub.clone();
            move |endpoint| {
                Ok(Box::new(hub.build_queue(endpoint.id.as_str())) as Box<dyn ReplayQueue>)
            }
        });
        registry
    }

    /// The hub backing the built-in memory adapters.
    pub fn memory_hub(&self) -> &MemoryHub {
        &self.hub
    }

    pub fn register_source<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&Endpoint) -> AdapterResult<Box<dyn Source>> + Send + Sync + 'static,
    {
        self.sources.insert(kind.to_string(), Arc::new(ctor));
    }

    pub fn register_sink<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&Endpoint) -> AdapterResult<Box<dyn Sink>> + Send + Sync + 'static,
    {
        self.sinks.insert(kind.to_string(), Arc::new(ctor));
    }

    pub fn register_queue<F>(&mut self, kind: &str, ctor: F)
    where
        F: Fn(&Endpoint) -> AdapterResult<Box<dyn ReplayQueue>> + Send + Sync + 'static,
    {
        self.queues.insert(kind.to_string(), Arc::new(ctor));
    }

    pub fn build_source(&self, endpoint: &Endpoint) -> AdapterResult<Box<dyn Source>> {
        check_active(endpoint)?;
        let ctor = self.sources.get(&endpoint.kind).ok_or_else(|| {
            AdapterError::Config(format!("no source adapter for kind {:?}", endpoint.kind))
        })?;
        ctor(endpoint)
    }

    pub fn build_sink(&self, endpoint: &Endpoint) -> AdapterResult<Box<dyn Sink>> {
        check_active(endpoint)?;
        let ctor = self.sinks.get(&endpoint.kind).ok_or_else(|| {
            AdapterError::Config(format!("no sink adapter for kind {:?}", endpoint.kind))
        })?;
        ctor(endpoint)
    }

    /// Build a DLQ adapter: a sink the engine can also drain as a source.
    pub fn build_queue(&self, endpoint: &Endpoint) -> AdapterResult<Box<dyn ReplayQueue>> {
        check_active(endpoint)?;
        let ctor = self.queues.get(&endpoint.kind).ok_or_else(|| {
            AdapterError::Config(format!(
                "kind {:?} cannot back a DLQ: no replay-queue adapter",
                endpoint.kind
            ))
        })?;
        ctor(endpoint)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn check_active(endpoint: &Endpoint) -> AdapterResult<()> {
    if !endpoint.active {
        return Err(AdapterError::Config(format!("endpoint {} is inactive", endpoint.id)));
    }
    Ok(())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

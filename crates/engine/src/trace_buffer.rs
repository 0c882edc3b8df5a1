// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded per-workflow trace ring, periodically flushed to the store.
//!
//! A store outage must not stop the engine: on flush failure the buffer
//! keeps the steps (dropping the oldest past capacity), flags itself
//! degraded, and retries on the next flush.

use hermod_core::TraceStep;
use hermod_store::MetadataStore;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

const CAPACITY: usize = 256;
const FLUSH_THRESHOLD: usize = 32;

pub struct TraceBuffer {
    steps: VecDeque<TraceStep>,
    dropped: u64,
    degraded: bool,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self { steps: VecDeque::new(), dropped: 0, degraded: false }
    }

    pub fn push(&mut self, step: TraceStep) {
        if self.steps.len() == CAPACITY {
            self.steps.pop_front();
            self.dropped += 1;
        }
        self.steps.push_back(step);
    }

    pub fn should_flush(&self) -> bool {
        self.steps.len() >= FLUSH_THRESHOLD
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// True after a flush failed; cleared by the next successful flush.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Steps evicted unflushed because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Write buffered steps to the store. Returns false when the store
    /// rejected the batch; the steps stay buffered.
    pub async fn flush(&mut self, store: &Arc<dyn MetadataStore>) -> bool {
        if self.steps.is_empty() {
            return true;
        }
        let batch: Vec<TraceStep> = self.steps.iter().cloned().collect();
        match store.append_trace_steps(&batch).await {
            Ok(()) => {
                self.steps.clear();
                self.degraded = false;
                true
            }
            Err(err) => {
                warn!(error = %err, buffered = self.steps.len(), "trace flush failed");
                self.degraded = true;
                false
            }
        }
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "trace_buffer_tests.rs"]
mod tests;

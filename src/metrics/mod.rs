// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Metrics data models and per-processor counters.
//!
//! Every processor runtime owns a [`ProcessorMetrics`] instance that counts
//! handled frames by category and errors, together with a live view of its
//! queue depths. A [`MetricsSnapshot`] is the serializable point-in-time view
//! carried by metrics frames.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::frames::FrameKind;

/// Live queue-depth counters shared between a processor's queue handle
/// (producer side) and its scheduler (consumer side).
#[derive(Debug, Default)]
pub struct QueueDepths {
    /// Number of frames currently waiting in the priority queue.
    pub priority: AtomicUsize,
    /// Number of frames currently waiting in the ordinary queue.
    pub ordinary: AtomicUsize,
}

/// Per-processor frame counters.
///
/// All counters use relaxed atomics; they are statistics, not synchronization.
#[derive(Debug)]
pub struct ProcessorMetrics {
    handled_total: AtomicU64,
    handled_system: AtomicU64,
    handled_data: AtomicU64,
    handled_control: AtomicU64,
    errors: AtomicU64,
    depths: Arc<QueueDepths>,
}

impl ProcessorMetrics {
    /// Create a new counter set sharing the given queue-depth view.
    pub fn new(depths: Arc<QueueDepths>) -> Self {
        Self {
            handled_total: AtomicU64::new(0),
            handled_system: AtomicU64::new(0),
            handled_data: AtomicU64::new(0),
            handled_control: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            depths,
        }
    }

    /// Record one handled frame of the given category.
    pub fn record(&self, kind: FrameKind) {
        self.handled_total.fetch_add(1, Ordering::Relaxed);
        match kind {
            FrameKind::System => self.handled_system.fetch_add(1, Ordering::Relaxed),
            FrameKind::Data => self.handled_data.fetch_add(1, Ordering::Relaxed),
            FrameKind::Control => self.handled_control.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record one handler error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of handler errors recorded so far.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Total number of frames handled so far.
    pub fn handled_total(&self) -> u64 {
        self.handled_total.load(Ordering::Relaxed)
    }

    /// Take a point-in-time snapshot for the named processor.
    pub fn snapshot(&self, processor: &str) -> MetricsSnapshot {
        MetricsSnapshot {
            processor: processor.to_string(),
            handled_total: self.handled_total.load(Ordering::Relaxed),
            handled_system: self.handled_system.load(Ordering::Relaxed),
            handled_data: self.handled_data.load(Ordering::Relaxed),
            handled_control: self.handled_control.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            priority_depth: self.depths.priority.load(Ordering::Relaxed),
            ordinary_depth: self.depths.ordinary.load(Ordering::Relaxed),
        }
    }
}

/// Serializable point-in-time view of a processor's counters and queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Name of the processor the snapshot belongs to.
    pub processor: String,
    /// Total frames handled.
    pub handled_total: u64,
    /// System frames handled.
    pub handled_system: u64,
    /// Data frames handled.
    pub handled_data: u64,
    /// Control frames handled.
    pub handled_control: u64,
    /// Handler errors recovered by the runtime.
    pub errors: u64,
    /// Priority queue depth at snapshot time.
    pub priority_depth: usize,
    /// Ordinary queue depth at snapshot time.
    pub ordinary_depth: usize,
}

/// Token usage statistics reported by language model adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input prompt.
    pub prompt_tokens: u64,
    /// Number of tokens in the generated completion.
    pub completion_tokens: u64,
    /// Total number of tokens used (prompt + completion).
    pub total_tokens: u64,
}

// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Frame processing infrastructure.
//!
//! This module provides the per-stage processor runtime used by every stage
//! in a pipeline: dual FIFO queues with category priority, a cooperative
//! scheduler task, lifecycle management, pause/resume, and error recovery.

pub mod audio;
pub mod runtime;

pub use crate::frames::FrameDirection;
pub use runtime::{
    DirectedFrame, FrameHandler, Passthrough, Processor, ProcessorState, QueueHandle,
    StageContext, StageError,
};

use serde::{Deserialize, Serialize};

/// Configuration recognized by every processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Explicit unique id; auto-assigned when `None`.
    pub id: Option<u64>,
    /// Explicit name; auto-generated from the handler type when `None`.
    pub name: Option<String>,
    /// Whether to maintain per-frame counters.
    pub enable_metrics: bool,
    /// Whether to emit per-frame trace logs.
    pub enable_logging: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            enable_metrics: true,
            enable_logging: true,
        }
    }
}

impl ProcessorConfig {
    /// Configuration with an explicit processor name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use voxflow::prelude::*;

/// A stage that records every frame its handler sees, then forwards it.
pub struct Recorder {
    seen: Arc<Mutex<Vec<Frame>>>,
}

#[async_trait]
impl FrameHandler for Recorder {
    fn name(&self) -> &'static str {
        "Recorder"
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        self.seen.lock().expect("seen lock").push(frame.clone());
        ctx.push(frame, direction);
        Ok(())
    }
}

/// A recorder processor plus the shared frame log behind it.
pub fn recorder() -> (Processor, Arc<Mutex<Vec<Frame>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let processor = Processor::with_defaults(Recorder { seen: seen.clone() });
    (processor, seen)
}

/// A pipeline downstream callback collecting frames into a shared log.
pub fn collecting_callback() -> (FrameCallback, Arc<Mutex<Vec<Frame>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cb = seen.clone();
    let callback = frame_callback(move |frame| {
        let seen = seen_cb.clone();
        async move {
            seen.lock().expect("seen lock").push(frame);
        }
    });
    (callback, seen)
}

/// Poll `condition` every few milliseconds until it holds or `timeout_ms`
/// elapses. Returns the final evaluation.
pub async fn wait_until(mut condition: impl FnMut() -> bool, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// The recorded frame names, for order assertions.
pub fn frame_names(seen: &Arc<Mutex<Vec<Frame>>>) -> Vec<&'static str> {
    seen.lock().expect("seen lock").iter().map(|f| f.name()).collect()
}

/// One 20 ms chunk of 16 kHz mono PCM16 at a clearly audible level.
pub fn loud_chunk() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(640);
    for _ in 0..320 {
        bytes.extend_from_slice(&8000i16.to_le_bytes());
    }
    bytes
}

/// One 20 ms chunk of 16 kHz mono silence.
pub fn silent_chunk() -> Vec<u8> {
    vec![0u8; 640]
}

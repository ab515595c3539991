// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! RMS-threshold voice-activity detection.
//!
//! A small state machine with two consecutive counters: a frame whose RMS
//! volume reaches the threshold counts toward the speech run, any other frame
//! counts toward the silence run. Crossing `start_frames` consecutive speech
//! frames transitions to speaking; crossing `stop_frames` consecutive silent
//! frames transitions back to quiet.

use serde::{Deserialize, Serialize};

use crate::audio::calculate_rms;

/// Parameters for VAD configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadParams {
    /// Whether voice-activity detection is enabled.
    pub enabled: bool,
    /// Normalized RMS threshold in [0.0, 1.0] above which a frame is speech.
    pub threshold: f64,
    /// Consecutive speech frames required to confirm speech started.
    pub start_frames: u32,
    /// Consecutive silent frames required to confirm speech stopped.
    pub stop_frames: u32,
}

impl Default for VadParams {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.01,
            start_frames: 3,
            stop_frames: 12,
        }
    }
}

/// Events emitted by the VAD on completed state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// No state transition occurred.
    None,
    /// The user started speaking.
    Started,
    /// The user stopped speaking.
    Stopped,
}

/// RMS-threshold voice-activity detector.
///
/// Free of any frame types or processor traits so it can be embedded in any
/// context.
#[derive(Debug)]
pub struct RmsVad {
    params: VadParams,
    speaking: bool,
    speech_count: u32,
    silence_count: u32,
}

impl RmsVad {
    /// Create a new detector in the quiet state.
    pub fn new(params: VadParams) -> Self {
        Self {
            params,
            speaking: false,
            speech_count: 0,
            silence_count: 0,
        }
    }

    /// Returns `true` while the detector considers the user to be speaking.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Return a reference to the current parameters.
    pub fn params(&self) -> &VadParams {
        &self.params
    }

    /// Feed one PCM16 audio frame and advance the state machine.
    ///
    /// Returns whether the frame itself was classified as speech, and any
    /// state transition that completed.
    pub fn process(&mut self, audio: &[u8]) -> (bool, VadEvent) {
        let rms = calculate_rms(audio);
        // A threshold of 1.0 admits nothing, even a full-scale signal whose
        // RMS clamps to exactly 1.0; a threshold of 0.0 admits everything.
        let is_speech = self.params.threshold < 1.0 && rms >= self.params.threshold;

        let event = if is_speech {
            self.speech_count += 1;
            self.silence_count = 0;
            if !self.speaking && self.speech_count >= self.params.start_frames {
                self.speaking = true;
                VadEvent::Started
            } else {
                VadEvent::None
            }
        } else {
            self.silence_count += 1;
            self.speech_count = 0;
            if self.speaking && self.silence_count >= self.params.stop_frames {
                self.speaking = false;
                VadEvent::Stopped
            } else {
                VadEvent::None
            }
        };

        (is_speech, event)
    }

    /// Reset to the quiet state, clearing both counters.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.speech_count = 0;
        self.silence_count = 0;
    }
}

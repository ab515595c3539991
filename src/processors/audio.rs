// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Utterance-level audio batching for batch speech recognition.
//!
//! [`AudioBatcherStage`] sits between a VAD-emitting input transport and a
//! batch STT stage. It accumulates input-audio chunks between the
//! user-started-speaking and user-stopped-speaking frames and emits one
//! concatenated input-audio frame per utterance. A small pre-roll ring buffer
//! captures the chunks that arrived just before the start transition so the
//! first phoneme is not clipped.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::frames::{Frame, FrameDirection, FramePayload};
use crate::processors::runtime::{FrameHandler, StageContext, StageError};

/// Configuration for the audio batcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Sample rate of the emitted utterance frame in Hz.
    pub sample_rate: u32,
    /// Channel count of the emitted utterance frame.
    pub num_channels: u32,
    /// Number of not-speaking chunks retained as pre-roll (0 disables).
    pub pre_roll_frames: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            num_channels: 1,
            pre_roll_frames: 5,
        }
    }
}

/// Accumulates per-utterance audio between speaking-state transitions.
///
/// Individual audio frames are consumed: chunks seen while speaking go into
/// the utterance buffer, chunks seen while quiet go into the pre-roll ring.
/// Speaking-state frames and everything else are forwarded.
#[derive(Debug)]
pub struct AudioBatcherStage {
    config: BatcherConfig,
    buffering: bool,
    buffer: Vec<u8>,
    pre_roll: VecDeque<Vec<u8>>,
}

impl AudioBatcherStage {
    pub fn new(config: BatcherConfig) -> Self {
        let pre_roll = VecDeque::with_capacity(config.pre_roll_frames);
        Self {
            config,
            buffering: false,
            buffer: Vec::new(),
            pre_roll,
        }
    }
}

#[async_trait]
impl FrameHandler for AudioBatcherStage {
    fn name(&self) -> &'static str {
        "AudioBatcher"
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match frame.payload() {
            FramePayload::UserStartedSpeaking => {
                self.buffering = true;
                for chunk in self.pre_roll.drain(..) {
                    self.buffer.extend_from_slice(&chunk);
                }
                ctx.push(frame, direction);
            }
            FramePayload::UserStoppedSpeaking => {
                self.buffering = false;
                ctx.push(frame, direction);
                if !self.buffer.is_empty() {
                    let audio = std::mem::take(&mut self.buffer);
                    ctx.push(
                        Frame::input_audio(audio, self.config.sample_rate, self.config.num_channels),
                        FrameDirection::Downstream,
                    );
                }
            }
            FramePayload::InputAudio(_) => {
                if let FramePayload::InputAudio(audio) = frame.into_payload() {
                    if self.buffering {
                        self.buffer.extend_from_slice(&audio.audio);
                    } else if self.config.pre_roll_frames > 0 {
                        if self.pre_roll.len() == self.config.pre_roll_frames {
                            self.pre_roll.pop_front();
                        }
                        self.pre_roll.push_back(audio.audio);
                    }
                }
            }
            _ => ctx.push(frame, direction),
        }
        Ok(())
    }
}

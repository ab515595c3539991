// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The speech synthesis stage.
//!
//! [`TtsStage`] speaks text frames through a [`TextToSpeech`] adapter,
//! bracketing every utterance with TTS-started and TTS-stopped control
//! frames. Transcription frames are user speech and pass through untouched;
//! text marked `skip_tts` passes through unspoken; empty text is dropped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::frames::{Frame, FrameDirection, FramePayload};
use crate::processors::runtime::{FrameHandler, StageContext, StageError};

/// Configuration recognized by the speech synthesis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Provider voice identifier.
    pub voice_id: Option<String>,
    /// Provider model identifier.
    pub model_id: Option<String>,
    /// Synthesis language.
    pub language: Option<String>,
    /// Requested output sample rate in Hz.
    pub sample_rate: u32,
    /// Requested output channel count.
    pub num_channels: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice_id: None,
            model_id: None,
            language: None,
            sample_rate: 24000,
            num_channels: 1,
        }
    }
}

/// Audio returned by a synthesis adapter.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// Raw PCM16 little-endian audio bytes.
    pub audio: Vec<u8>,
    /// Sample rate of the audio in Hz.
    pub sample_rate: u32,
    /// Channel count of the audio.
    pub num_channels: u32,
}

/// Contract a concrete speech synthesis provider implements.
#[async_trait]
pub trait TextToSpeech: Send + 'static {
    /// Synthesize one utterance.
    async fn synthesize(&mut self, text: &str) -> Result<SynthesizedAudio, StageError>;
}

/// The generic speech synthesis stage.
pub struct TtsStage {
    config: TtsConfig,
    adapter: Box<dyn TextToSpeech>,
}

impl TtsStage {
    pub fn new<A: TextToSpeech>(adapter: A, config: TtsConfig) -> Self {
        Self {
            config,
            adapter: Box::new(adapter),
        }
    }

    async fn speak(&mut self, text: &str, ctx: &StageContext) -> Result<(), StageError> {
        ctx.push(
            Frame::new(FramePayload::TtsStarted),
            FrameDirection::Downstream,
        );
        let outcome = self.adapter.synthesize(text).await;
        let result = match outcome {
            Ok(audio) => {
                ctx.push(
                    Frame::tts_audio(audio.audio, audio.sample_rate, audio.num_channels),
                    FrameDirection::Downstream,
                );
                Ok(())
            }
            Err(e) => Err(e),
        };
        // The stopped frame goes out on every path, adapter errors included.
        ctx.push(
            Frame::new(FramePayload::TtsStopped),
            FrameDirection::Downstream,
        );
        result
    }
}

#[async_trait]
impl FrameHandler for TtsStage {
    fn name(&self) -> &'static str {
        "TTS"
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match frame.payload() {
            // Transcriptions are user speech, not ours to speak.
            FramePayload::Transcription(_) | FramePayload::InterimTranscription(_) => {
                ctx.push(frame, direction);
            }
            FramePayload::Text(t) | FramePayload::LlmText(t) => {
                if t.skip_tts {
                    ctx.push(frame, direction);
                } else if t.text.trim().is_empty() {
                    // Dropped: nothing to speak, no started/stopped pair.
                } else {
                    let text = t.text.clone();
                    self.speak(&text, ctx).await?;
                }
            }
            FramePayload::UpdateSettings(settings) => {
                if let Some(voice_id) = settings.get("voice_id").and_then(|v| v.as_str()) {
                    self.config.voice_id = Some(voice_id.to_string());
                }
                if let Some(model_id) = settings.get("model_id").and_then(|v| v.as_str()) {
                    self.config.model_id = Some(model_id.to_string());
                }
                if let Some(language) = settings.get("language").and_then(|v| v.as_str()) {
                    self.config.language = Some(language.to_string());
                }
                ctx.push(frame, direction);
            }
            _ => ctx.push(frame, direction),
        }
        Ok(())
    }
}

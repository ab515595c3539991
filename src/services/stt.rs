// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Speech recognition stages.
//!
//! Two stage flavors share one output contract:
//!
//! - [`SttStage`] (batch): every input-audio frame is handed to the adapter's
//!   `transcribe` and the returned result is emitted right after the audio
//!   frame is forwarded.
//! - [`StreamingSttStage`]: a long-lived connection is opened during setup;
//!   audio is dispatched to it without waiting, and results arrive
//!   asynchronously through a [`TranscriptionSink`] the adapter was given.
//!
//! Either way, empty results are dropped, interim results become interim
//! transcription frames, and missing user id or timestamp fall back to the
//! stage configuration and the wall clock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::frames::{
    Frame, FrameDirection, FramePayload, InterimTranscriptionData, TranscriptionData,
};
use crate::processors::runtime::{FrameHandler, QueueHandle, StageContext, StageError};
use crate::utils::now_iso8601;

/// Configuration recognized by the speech recognition stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Default user id stamped on results that carry none.
    pub user_id: String,
    /// Default language stamped on final results that carry none.
    pub language: Option<String>,
    /// Expected input sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            user_id: "user".to_string(),
            language: None,
            sample_rate: 16000,
        }
    }
}

/// One recognition result produced by an adapter.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionResult {
    /// The recognized text.
    pub text: String,
    /// Whether this is a partial (interim) result.
    pub interim: bool,
    /// Detected language, if the provider reports one.
    pub language: Option<String>,
    /// Speaker id, if the provider reports one.
    pub user_id: Option<String>,
    /// ISO-8601 timestamp, if the provider reports one.
    pub timestamp: Option<String>,
    /// Raw provider payload.
    pub raw: Option<serde_json::Value>,
}

/// Contract a batch speech recognition provider implements.
#[async_trait]
pub trait SpeechToText: Send + 'static {
    /// Transcribe one complete utterance.
    async fn transcribe(
        &mut self,
        audio: &[u8],
        sample_rate: u32,
        num_channels: u32,
    ) -> Result<TranscriptionResult, StageError>;
}

/// Contract a streaming speech recognition provider implements.
#[async_trait]
pub trait StreamingSpeechToText: Send + 'static {
    /// Open the recognition connection. Results are posted through `results`.
    async fn connect(&mut self, results: TranscriptionSink) -> Result<(), StageError>;

    /// Dispatch one chunk of audio to the open connection.
    async fn send_audio(
        &mut self,
        audio: &[u8],
        sample_rate: u32,
        num_channels: u32,
    ) -> Result<(), StageError>;

    /// Close the recognition connection.
    async fn disconnect(&mut self) -> Result<(), StageError>;
}

/// Convert one result into a transcription frame, applying the stage
/// defaults. Empty text (after trimming) yields `None`.
fn result_to_frame(result: TranscriptionResult, config: &SttConfig) -> Option<Frame> {
    if result.text.trim().is_empty() {
        return None;
    }
    let user_id = result
        .user_id
        .unwrap_or_else(|| config.user_id.clone());
    let timestamp = result.timestamp.unwrap_or_else(now_iso8601);

    let frame = if result.interim {
        Frame::new(FramePayload::InterimTranscription(InterimTranscriptionData {
            text: result.text,
            user_id,
            timestamp,
            raw: result.raw,
        }))
    } else {
        Frame::new(FramePayload::Transcription(TranscriptionData {
            text: result.text,
            user_id,
            timestamp,
            language: result.language.or_else(|| config.language.clone()),
            raw: result.raw,
        }))
    };
    Some(frame)
}

/// Posts recognition results into the owning stage's queue machinery.
///
/// Streaming adapters hold one of these; results queued here arrive on the
/// stage's own scheduler and are forwarded downstream, preserving the
/// single-writer discipline.
#[derive(Debug, Clone)]
pub struct TranscriptionSink {
    queue: QueueHandle,
    config: SttConfig,
}

impl TranscriptionSink {
    /// Convert a result and post it for downstream delivery.
    pub fn push(&self, result: TranscriptionResult) {
        if let Some(frame) = result_to_frame(result, &self.config) {
            self.queue.queue(frame, FrameDirection::Downstream);
        }
    }

    /// Post a non-fatal error notification.
    pub fn push_error(&self, message: impl Into<String>) {
        self.queue
            .queue(Frame::error(message, false), FrameDirection::Downstream);
    }
}

// ---------------------------------------------------------------------------
// Batch stage
// ---------------------------------------------------------------------------

/// Batch speech recognition stage.
pub struct SttStage {
    config: SttConfig,
    adapter: Box<dyn SpeechToText>,
}

impl SttStage {
    pub fn new<A: SpeechToText>(adapter: A, config: SttConfig) -> Self {
        Self {
            config,
            adapter: Box::new(adapter),
        }
    }
}

#[async_trait]
impl FrameHandler for SttStage {
    fn name(&self) -> &'static str {
        "STT"
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match frame.payload() {
            FramePayload::InputAudio(audio) => {
                let outcome = self
                    .adapter
                    .transcribe(&audio.audio, audio.sample_rate, audio.num_channels)
                    .await;
                // Audio stays available to later stages either way.
                ctx.push(frame, direction);
                let result = outcome?;
                if let Some(out) = result_to_frame(result, &self.config) {
                    ctx.push(out, FrameDirection::Downstream);
                }
            }
            FramePayload::UpdateSettings(settings) => {
                if let Some(language) = settings.get("language").and_then(|v| v.as_str()) {
                    self.config.language = Some(language.to_string());
                }
                if let Some(user_id) = settings.get("user_id").and_then(|v| v.as_str()) {
                    self.config.user_id = user_id.to_string();
                }
                ctx.push(frame, direction);
            }
            _ => ctx.push(frame, direction),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Streaming stage
// ---------------------------------------------------------------------------

/// Streaming speech recognition stage.
pub struct StreamingSttStage {
    config: SttConfig,
    adapter: Box<dyn StreamingSpeechToText>,
}

impl StreamingSttStage {
    pub fn new<A: StreamingSpeechToText>(adapter: A, config: SttConfig) -> Self {
        Self {
            config,
            adapter: Box::new(adapter),
        }
    }
}

#[async_trait]
impl FrameHandler for StreamingSttStage {
    fn name(&self) -> &'static str {
        "StreamingSTT"
    }

    async fn setup(&mut self, ctx: &StageContext) -> Result<(), StageError> {
        let sink = TranscriptionSink {
            queue: ctx.own_queue(),
            config: self.config.clone(),
        };
        self.adapter.connect(sink).await
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match frame.payload() {
            FramePayload::InputAudio(audio) => {
                self.adapter
                    .send_audio(&audio.audio, audio.sample_rate, audio.num_channels)
                    .await?;
                ctx.push(frame, direction);
            }
            _ => ctx.push(frame, direction),
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), StageError> {
        self.adapter.disconnect().await
    }
}

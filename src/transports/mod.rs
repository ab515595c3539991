// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Transport stages for audio ingress and egress.
//!
//! [`InputTransportStage`] pulls raw audio buffers from a [`TransportInput`]
//! adapter on a background task, shapes them into input-audio frames, applies
//! voice-activity detection, and emits speaking-state transitions.
//!
//! [`OutputTransportStage`] buffers outgoing audio in transmission-sized
//! chunks, drains it to a [`TransportOutput`] adapter on a background task,
//! and tracks the bot speaking state.

pub mod websocket;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::vad::{RmsVad, VadEvent, VadParams};
use crate::frames::{AudioData, Frame, FrameDirection, FramePayload};
use crate::processors::runtime::{FrameHandler, StageContext, StageError};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Parameters for one audio direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParams {
    /// Whether this direction carries audio at all.
    pub enabled: bool,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub num_channels: u32,
    /// Transmission chunk duration in milliseconds.
    pub chunk_size_ms: u32,
}

/// Transport configuration: ingress, egress, and VAD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportParams {
    pub audio_in: AudioParams,
    pub audio_out: AudioParams,
    pub vad: VadParams,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            audio_in: AudioParams {
                enabled: true,
                sample_rate: 16000,
                num_channels: 1,
                chunk_size_ms: 20,
            },
            audio_out: AudioParams {
                enabled: true,
                sample_rate: 24000,
                num_channels: 1,
                chunk_size_ms: 20,
            },
            vad: VadParams::default(),
        }
    }
}

fn chunk_size_bytes(sample_rate: u32, num_channels: u32, chunk_size_ms: u32) -> usize {
    (sample_rate as usize * num_channels as usize * 2 * chunk_size_ms as usize) / 1000
}

// ---------------------------------------------------------------------------
// Adapter contracts
// ---------------------------------------------------------------------------

/// Contract a concrete audio source implements (e.g. a websocket reader).
#[async_trait]
pub trait TransportInput: Send + 'static {
    /// Return the next raw-audio buffer, or `None` when the stream ends.
    async fn receive_audio(&mut self) -> Option<Vec<u8>>;
}

/// Contract a concrete audio sink implements (e.g. a websocket writer).
#[async_trait]
pub trait TransportOutput: Send + 'static {
    /// Deliver one audio frame to the remote peer.
    async fn send_audio(&mut self, frame: &Frame) -> Result<(), StageError>;

    /// Deliver one outbound message frame to the remote peer.
    async fn send_message(&mut self, frame: &Frame) -> Result<(), StageError>;
}

// ---------------------------------------------------------------------------
// Input transport stage
// ---------------------------------------------------------------------------

/// Audio ingress: raw buffers become framed input with speaking-state
/// transitions.
///
/// With VAD enabled only speech-classified frames are forwarded; the quiet
/// chunks ahead of the start transition are speech-classified too and reach
/// a downstream batcher's pre-roll ring.
pub struct InputTransportStage {
    params: TransportParams,
    vad: RmsVad,
    adapter: Option<Box<dyn TransportInput>>,
    receive_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl InputTransportStage {
    pub fn new<A: TransportInput>(adapter: A, params: TransportParams) -> Self {
        let vad = RmsVad::new(params.vad.clone());
        Self {
            params,
            vad,
            adapter: Some(Box::new(adapter)),
            receive_task: None,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl FrameHandler for InputTransportStage {
    fn name(&self) -> &'static str {
        "TransportInput"
    }

    async fn setup(&mut self, ctx: &StageContext) -> Result<(), StageError> {
        if !self.params.audio_in.enabled {
            return Ok(());
        }
        let Some(mut adapter) = self.adapter.take() else {
            return Ok(());
        };

        let own = ctx.own_queue();
        let sample_rate = self.params.audio_in.sample_rate;
        let num_channels = self.params.audio_in.num_channels;
        let cancel = self.cancel.clone();

        self.receive_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    buffer = adapter.receive_audio() => match buffer {
                        Some(audio) => own.queue(
                            Frame::input_audio(audio, sample_rate, num_channels),
                            FrameDirection::Downstream,
                        ),
                        None => break,
                    },
                }
            }
            tracing::debug!(processor = %own.name(), "audio receive loop ended");
        }));
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match frame.payload() {
            FramePayload::InputAudio(audio) => {
                if !self.params.vad.enabled {
                    ctx.push(frame, direction);
                } else {
                    let (is_speech, event) = self.vad.process(&audio.audio);
                    match event {
                        VadEvent::Started => ctx.push(
                            Frame::new(FramePayload::UserStartedSpeaking),
                            FrameDirection::Downstream,
                        ),
                        VadEvent::Stopped => ctx.push(
                            Frame::new(FramePayload::UserStoppedSpeaking),
                            FrameDirection::Downstream,
                        ),
                        VadEvent::None => {}
                    }
                    if is_speech {
                        ctx.push(frame, direction);
                    }
                }
            }
            _ => ctx.push(frame, direction),
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), StageError> {
        self.cancel.cancel();
        if let Some(task) = self.receive_task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output transport stage
// ---------------------------------------------------------------------------

/// State shared between the output handler and its drain task.
struct OutputShared {
    buffer: Mutex<VecDeque<Frame>>,
    tts_active: AtomicBool,
    bot_speaking: AtomicBool,
}

/// Audio egress: buffers audio frames and drains them to the adapter,
/// emitting bot speaking-state transitions.
pub struct OutputTransportStage {
    params: TransportParams,
    shared: Arc<OutputShared>,
    adapter: Arc<tokio::sync::Mutex<Box<dyn TransportOutput>>>,
    drain_task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl OutputTransportStage {
    pub fn new<A: TransportOutput>(adapter: A, params: TransportParams) -> Self {
        Self {
            params,
            shared: Arc::new(OutputShared {
                buffer: Mutex::new(VecDeque::new()),
                tts_active: AtomicBool::new(false),
                bot_speaking: AtomicBool::new(false),
            }),
            adapter: Arc::new(tokio::sync::Mutex::new(Box::new(adapter))),
            drain_task: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Split audio into transmission-sized chunks and append to the buffer.
    fn buffer_audio(&self, audio: AudioData) {
        let chunk_bytes = chunk_size_bytes(
            audio.sample_rate,
            audio.num_channels,
            self.params.audio_out.chunk_size_ms,
        );
        let sample_rate = audio.sample_rate;
        let num_channels = audio.num_channels;

        let mut buffer = self.shared.buffer.lock().expect("buffer lock");
        if chunk_bytes == 0 || audio.audio.len() <= chunk_bytes {
            buffer.push_back(Frame::output_audio(audio.audio, sample_rate, num_channels));
        } else {
            for chunk in audio.audio.chunks(chunk_bytes) {
                buffer.push_back(Frame::output_audio(
                    chunk.to_vec(),
                    sample_rate,
                    num_channels,
                ));
            }
        }
    }
}

#[async_trait]
impl FrameHandler for OutputTransportStage {
    fn name(&self) -> &'static str {
        "TransportOutput"
    }

    async fn setup(&mut self, ctx: &StageContext) -> Result<(), StageError> {
        if !self.params.audio_out.enabled {
            return Ok(());
        }

        let shared = self.shared.clone();
        let adapter = self.adapter.clone();
        let own = ctx.own_queue();
        let cancel = self.cancel.clone();

        self.drain_task = Some(tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = shared.buffer.lock().expect("buffer lock").pop_front();
                match next {
                    Some(frame) => {
                        if let Err(e) = adapter.lock().await.send_audio(&frame).await {
                            tracing::warn!(processor = %own.name(), "send_audio failed: {e}");
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_millis(2)) => {}
                        }
                    }
                }

                // Checked after each send and on idle ticks, so a stopped
                // synthesis is reported even when the buffer drained first.
                let empty = shared.buffer.lock().expect("buffer lock").is_empty();
                if empty
                    && !shared.tts_active.load(Ordering::Acquire)
                    && shared
                        .bot_speaking
                        .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    own.queue(
                        Frame::new(FramePayload::BotStoppedSpeaking),
                        FrameDirection::Downstream,
                    );
                }
            }
            tracing::debug!(processor = %own.name(), "audio drain loop ended");
        }));
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match frame.payload() {
            FramePayload::TtsStarted => {
                self.shared.tts_active.store(true, Ordering::Release);
                if !self.shared.bot_speaking.swap(true, Ordering::AcqRel) {
                    ctx.push(
                        Frame::new(FramePayload::BotStartedSpeaking),
                        FrameDirection::Downstream,
                    );
                }
            }
            FramePayload::TtsStopped => {
                self.shared.tts_active.store(false, Ordering::Release);
            }
            FramePayload::TtsAudio(_) | FramePayload::OutputAudio(_) => {
                if !self.params.audio_out.enabled {
                    ctx.push(frame, direction);
                } else {
                    if !self.shared.bot_speaking.swap(true, Ordering::AcqRel) {
                        ctx.push(
                            Frame::new(FramePayload::BotStartedSpeaking),
                            FrameDirection::Downstream,
                        );
                    }
                    if let FramePayload::TtsAudio(audio) | FramePayload::OutputAudio(audio) =
                        frame.into_payload()
                    {
                        self.buffer_audio(audio);
                    }
                }
            }
            FramePayload::OutputTransportMessage(_)
            | FramePayload::OutputTransportMessageUrgent(_) => {
                self.adapter.lock().await.send_message(&frame).await?;
            }
            _ => ctx.push(frame, direction),
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), StageError> {
        self.cancel.cancel();
        if let Some(task) = self.drain_task.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

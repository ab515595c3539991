// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! JSON wire format for browser-style peers.
//!
//! Control messages travel as JSON text objects carrying a `type` tag and a
//! `data` payload; audio travels as raw PCM binary messages.
//!
//! # Wire format
//!
//! Outgoing:
//!
//! ```json
//! { "type": "transcription", "data": { "text": "...", "userId": "...", "timestamp": "...", "final": true } }
//! { "type": "bot_response",  "data": { "text": "..." } }
//! { "type": "message",       "data": { ... } }
//! { "type": "error",         "data": { "message": "...", "fatal": false } }
//! ```
//!
//! plus binary messages holding raw 16-bit little-endian PCM for audio
//! frames.
//!
//! Inbound binary messages become input-audio frames at the configured
//! ingress rate. Inbound JSON text becomes an inbound transport message
//! frame; a `{"type": "audio", "data": {"audio": "<base64>"}}` object is
//! decoded into an input-audio frame instead.

use serde_json::json;

use crate::frames::{Frame, FramePayload};
use crate::serializers::{FrameSerializer, SerializedFrame};
use crate::utils::decode_base64;

/// JSON + raw-PCM serializer for a generic websocket peer.
#[derive(Debug, Clone)]
pub struct JsonWireSerializer {
    /// Sample rate assumed for inbound binary audio.
    audio_in_sample_rate: u32,
    /// Channel count assumed for inbound binary audio.
    audio_in_channels: u32,
}

impl JsonWireSerializer {
    pub fn new(audio_in_sample_rate: u32, audio_in_channels: u32) -> Self {
        Self {
            audio_in_sample_rate,
            audio_in_channels,
        }
    }
}

impl Default for JsonWireSerializer {
    fn default() -> Self {
        Self::new(16000, 1)
    }
}

impl FrameSerializer for JsonWireSerializer {
    fn serialize(&self, frame: &Frame) -> Option<SerializedFrame> {
        match frame.payload() {
            FramePayload::Transcription(t) => {
                let message = json!({
                    "type": "transcription",
                    "data": {
                        "text": t.text,
                        "userId": t.user_id,
                        "timestamp": t.timestamp,
                        "final": true,
                    },
                });
                Some(SerializedFrame::Text(message.to_string()))
            }
            FramePayload::InterimTranscription(t) => {
                let message = json!({
                    "type": "transcription",
                    "data": {
                        "text": t.text,
                        "userId": t.user_id,
                        "timestamp": t.timestamp,
                        "final": false,
                    },
                });
                Some(SerializedFrame::Text(message.to_string()))
            }
            FramePayload::Text(t) | FramePayload::LlmText(t) => {
                let message = json!({
                    "type": "bot_response",
                    "data": { "text": t.text },
                });
                Some(SerializedFrame::Text(message.to_string()))
            }
            FramePayload::OutputTransportMessage(value)
            | FramePayload::OutputTransportMessageUrgent(value) => {
                let message = json!({ "type": "message", "data": value });
                Some(SerializedFrame::Text(message.to_string()))
            }
            FramePayload::Error { message, fatal } => {
                let message = json!({
                    "type": "error",
                    "data": { "message": message, "fatal": fatal },
                });
                Some(SerializedFrame::Text(message.to_string()))
            }
            FramePayload::OutputAudio(audio) | FramePayload::TtsAudio(audio) => {
                Some(SerializedFrame::Binary(audio.audio.clone()))
            }
            _ => None,
        }
    }

    fn deserialize(&self, data: &SerializedFrame) -> Option<Frame> {
        match data {
            SerializedFrame::Binary(bytes) => Some(Frame::input_audio(
                bytes.clone(),
                self.audio_in_sample_rate,
                self.audio_in_channels,
            )),
            SerializedFrame::Text(text) => {
                let value: serde_json::Value = match serde_json::from_str(text) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!("discarding unparseable peer message: {e}");
                        return None;
                    }
                };

                if value.get("type").and_then(|t| t.as_str()) == Some("audio") {
                    let audio = value
                        .get("data")
                        .and_then(|d| d.get("audio"))
                        .and_then(|a| a.as_str())
                        .and_then(decode_base64)?;
                    return Some(Frame::input_audio(
                        audio,
                        self.audio_in_sample_rate,
                        self.audio_in_channels,
                    ));
                }

                Some(Frame::new(FramePayload::InputTransportMessage(value)))
            }
        }
    }
}

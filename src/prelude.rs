// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Common re-exports for convenient use of the voxflow framework.
//!
//! ```
//! use voxflow::prelude::*;
//! ```

pub use std::sync::Arc;

pub use async_trait::async_trait;

pub use crate::audio::vad::{RmsVad, VadEvent, VadParams};
pub use crate::frames::{
    AudioData, ChatMessage, ChatRole, Frame, FrameDirection, FrameKind, FramePayload,
    FunctionCall, FunctionCallResult, StageRef, StartSettings, TextData, ToolChoice,
    TranscriptionData,
};
pub use crate::metrics::{MetricsSnapshot, TokenUsage};
pub use crate::pipeline::{frame_callback, FrameCallback, Pipeline, PipelineParams};
pub use crate::processors::audio::{AudioBatcherStage, BatcherConfig};
pub use crate::processors::{
    FrameHandler, Passthrough, Processor, ProcessorConfig, ProcessorState, StageContext,
    StageError,
};
pub use crate::serializers::{FrameSerializer, SerializedFrame};
pub use crate::services::context::Conversation;
pub use crate::services::llm::{
    Completion, CompletionRequest, LanguageModel, LlmConfig, LlmStage,
};
pub use crate::services::stt::{
    SpeechToText, SttConfig, SttStage, StreamingSpeechToText, StreamingSttStage,
    TranscriptionResult, TranscriptionSink,
};
pub use crate::services::tts::{SynthesizedAudio, TextToSpeech, TtsConfig, TtsStage};
pub use crate::transports::{
    AudioParams, InputTransportStage, OutputTransportStage, TransportInput, TransportOutput,
    TransportParams,
};
pub use crate::utils::next_object_id;

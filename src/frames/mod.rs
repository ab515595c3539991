// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Core frame definitions for the voxflow pipeline.
//!
//! All data flows as [`Frame`] values through a pipeline of frame processors.
//! Frames represent data units (audio, text, transcriptions) and control
//! signals. They flow **downstream** (input to output) or **upstream**
//! (interruptions, back-channel signals).
//!
//! # Frame categories
//!
//! Every frame belongs to exactly one [`FrameKind`]:
//!
//! - **System**: high-priority lifecycle and control signals that preempt
//!   content (start, cancel, stop, error, interruption, pause/resume,
//!   metrics).
//! - **Control**: in-order flow control tied to content (end-of-stream, TTS
//!   started/stopped, LLM response start/end, function calls, settings).
//! - **Data**: content payloads (audio, text, transcriptions, images,
//!   speaking-state transitions, transport messages).
//!
//! The category is a stable property of the payload variant; the processor
//! runtime inspects only the category and a small closed set of specific
//! variants to make routing decisions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;
use crate::utils::next_object_id;

// ---------------------------------------------------------------------------
// Presentation timestamp helpers
// ---------------------------------------------------------------------------

/// Format a presentation timestamp (nanoseconds) to a human-readable string.
pub fn format_pts(pts: Option<u64>) -> String {
    match pts {
        Some(ns) => {
            let secs = ns / 1_000_000_000;
            let frac = ns % 1_000_000_000;
            format!("{}.{:09}", secs, frac)
        }
        None => "None".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Frame category enum
// ---------------------------------------------------------------------------

/// Categorizes a frame into one of the primary processing categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameKind {
    /// System frame: high-priority, preempts queued content.
    System,
    /// Control frame: ordered control signal tied to content.
    Control,
    /// Data frame: ordered content payload.
    Data,
}

/// Direction of frame flow in the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameDirection {
    /// Frames flowing from input to output.
    Downstream,
    /// Frames flowing back from output to input.
    Upstream,
}

// ---------------------------------------------------------------------------
// Embedded data structs (not frames themselves)
// ---------------------------------------------------------------------------

/// Raw audio data embedded in audio frame types.
///
/// Sample rate and channel count are immutable for the life of the frame.
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Raw audio bytes in PCM format (16-bit signed little-endian).
    pub audio: Vec<u8>,
    /// Audio sample rate in Hz (e.g. 16000, 24000).
    pub sample_rate: u32,
    /// Number of audio channels (1 = mono, 2 = stereo).
    pub num_channels: u32,
    /// Number of audio frames (computed from audio length).
    pub num_frames: u32,
}

impl AudioData {
    /// Create new audio data, computing `num_frames` automatically.
    pub fn new(audio: Vec<u8>, sample_rate: u32, num_channels: u32) -> Self {
        let num_frames = if num_channels > 0 {
            let bytes_per_frame = (num_channels as usize).saturating_mul(2);
            (audio.len() / bytes_per_frame).min(u32::MAX as usize) as u32
        } else {
            0
        };
        Self {
            audio,
            sample_rate,
            num_channels,
            num_frames,
        }
    }
}

/// Raw image data embedded in image frame types.
#[derive(Debug, Clone)]
pub struct ImageData {
    /// Raw image bytes.
    pub image: Vec<u8>,
    /// Image dimensions as (width, height).
    pub size: (u32, u32),
    /// Image format (e.g. "RGB", "JPEG").
    pub format: Option<String>,
}

/// Text content carried by text frames.
#[derive(Debug, Clone)]
pub struct TextData {
    /// The text content.
    pub text: String,
    /// Whether this text should be skipped by the TTS stage.
    pub skip_tts: bool,
}

impl TextData {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            skip_tts: false,
        }
    }
}

/// Final transcription result from speech recognition.
#[derive(Debug, Clone)]
pub struct TranscriptionData {
    /// The transcribed text.
    pub text: String,
    /// Identifier for the user who spoke.
    pub user_id: String,
    /// ISO-8601 timestamp of when the transcription occurred.
    pub timestamp: String,
    /// Detected or specified language of the speech.
    pub language: Option<String>,
    /// Raw result from the speech recognition provider.
    pub raw: Option<serde_json::Value>,
}

/// Interim (partial) transcription result from speech recognition.
#[derive(Debug, Clone)]
pub struct InterimTranscriptionData {
    /// The interim transcribed text.
    pub text: String,
    /// Identifier for the user who spoke.
    pub user_id: String,
    /// ISO-8601 timestamp of when the interim transcription occurred.
    pub timestamp: String,
    /// Raw result from the speech recognition provider.
    pub raw: Option<serde_json::Value>,
}

/// A function call requested by the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Unique identifier the provider uses to correlate the result.
    pub call_id: String,
    /// Name of the function to call.
    pub name: String,
    /// Arguments to pass to the function.
    pub arguments: serde_json::Value,
}

/// The result of an executed function call, fed back to the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallResult {
    /// Identifier of the originating function call.
    pub call_id: String,
    /// Name of the function that was executed.
    pub name: String,
    /// The value returned by the function.
    pub result: serde_json::Value,
}

/// Parameters carried by the start frame that initializes the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSettings {
    /// Input audio sample rate in Hz.
    pub audio_in_sample_rate: u32,
    /// Output audio sample rate in Hz.
    pub audio_out_sample_rate: u32,
    /// Whether to allow user interruptions.
    pub allow_interruptions: bool,
    /// Whether to enable performance metrics collection.
    pub enable_metrics: bool,
}

impl Default for StartSettings {
    fn default() -> Self {
        Self {
            audio_in_sample_rate: 16000,
            audio_out_sample_rate: 24000,
            allow_interruptions: false,
            enable_metrics: false,
        }
    }
}

/// Addresses a single processor for pause/resume frames, by id or name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageRef {
    /// Match a processor by its unique numeric id.
    Id(u64),
    /// Match a processor by its human-readable name.
    Name(String),
}

impl StageRef {
    /// Returns `true` if this reference addresses the given processor.
    pub fn matches(&self, id: u64, name: &str) -> bool {
        match self {
            StageRef::Id(target) => *target == id,
            StageRef::Name(target) => target == name,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation messages (LLM context)
// ---------------------------------------------------------------------------

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Function,
}

/// A single conversation message exchanged with a language model.
///
/// For function-role messages the `name` field carries the call identifier
/// the provider expects to correlate with an earlier function call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The message role.
    pub role: ChatRole,
    /// The text content of the message.
    pub content: String,
    /// Optional function call identifier (function-role messages).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            name: None,
        }
    }

    pub fn function(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Function,
            content: content.into(),
            name: Some(name.into()),
        }
    }
}

/// Tool-choice policy for language model generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Let the model decide whether to call tools.
    Auto,
    /// Never call tools.
    None,
    /// Force the model to call at least one tool.
    Required,
    /// Force the model to call the named function.
    Function(String),
}

impl Default for ToolChoice {
    fn default() -> Self {
        ToolChoice::Auto
    }
}

// ---------------------------------------------------------------------------
// Frame payload
// ---------------------------------------------------------------------------

/// The tagged payload of a [`Frame`].
///
/// The variant tag drives all routing decisions in the runtime; handlers are
/// free to match on the full payload.
#[derive(Debug, Clone)]
pub enum FramePayload {
    // -- System frames ------------------------------------------------------
    /// Initial frame that configures pipeline processing.
    Start(StartSettings),
    /// Request for immediate cancellation; discards queued content.
    Cancel {
        /// Optional reason for the cancellation.
        reason: Option<String>,
    },
    /// Request for an orderly shutdown of each processor it traverses.
    Stop,
    /// Error notification; `fatal` errors indicate unrecoverable failures.
    Error {
        /// Description of the error.
        message: String,
        /// Whether the error is fatal.
        fatal: bool,
    },
    /// Interruption signal (e.g. the user started speaking mid-response).
    Interruption,
    /// Pause a single processor's ordinary queue.
    PauseProcessor(StageRef),
    /// Resume a single paused processor.
    ResumeProcessor(StageRef),
    /// Performance metrics reports collected from processors.
    Metrics(Vec<MetricsSnapshot>),

    // -- Control frames -----------------------------------------------------
    /// End of stream marker.
    End,
    /// Speech synthesis has started for one utterance.
    TtsStarted,
    /// Speech synthesis has finished for one utterance.
    TtsStopped,
    /// A language model response is about to begin.
    LlmResponseStart {
        /// Whether the generated text should bypass TTS.
        skip_tts: bool,
    },
    /// The language model response has completed.
    LlmResponseEnd,
    /// A function call requested by the language model.
    FunctionCall(FunctionCall),
    /// The result of an executed function call.
    FunctionCallResult(FunctionCallResult),
    /// Append messages to the language model context.
    LlmMessagesAppend {
        /// Messages to append.
        messages: Vec<ChatMessage>,
        /// Whether to trigger generation after appending.
        run: bool,
    },
    /// Replace the language model context with new messages.
    LlmMessagesReplace {
        /// Messages that replace the current context.
        messages: Vec<ChatMessage>,
        /// Whether to trigger generation after replacing.
        run: bool,
    },
    /// Replace the language model tool set.
    LlmSetTools(Vec<serde_json::Value>),
    /// Replace the language model tool-choice policy.
    LlmSetToolChoice(ToolChoice),
    /// Configure language model output handling.
    LlmConfigureOutput {
        /// Whether generated text should bypass TTS.
        skip_tts: bool,
    },
    /// Trigger language model generation with the current context.
    LlmRun,
    /// Generic service settings update.
    UpdateSettings(HashMap<String, serde_json::Value>),

    // -- Data frames --------------------------------------------------------
    /// Raw audio input from a transport.
    InputAudio(AudioData),
    /// Raw audio output to a transport.
    OutputAudio(AudioData),
    /// Audio generated by a speech synthesis stage.
    TtsAudio(AudioData),
    /// Text content.
    Text(TextData),
    /// Text generated by a language model.
    LlmText(TextData),
    /// Final transcription from speech recognition.
    Transcription(TranscriptionData),
    /// Interim transcription from speech recognition.
    InterimTranscription(InterimTranscriptionData),
    /// Image content.
    Image(ImageData),
    /// The user started speaking (voice-activity detection).
    UserStartedSpeaking,
    /// The user stopped speaking (voice-activity detection).
    UserStoppedSpeaking,
    /// The bot started speaking (output transport).
    BotStartedSpeaking,
    /// The bot stopped speaking (output transport).
    BotStoppedSpeaking,
    /// Structured message received from the remote peer.
    InputTransportMessage(serde_json::Value),
    /// Structured message to deliver to the remote peer.
    OutputTransportMessage(serde_json::Value),
    /// Urgent structured message to deliver to the remote peer.
    OutputTransportMessageUrgent(serde_json::Value),
}

impl FramePayload {
    /// Returns the [`FrameKind`] for this payload.
    pub fn kind(&self) -> FrameKind {
        use FramePayload::*;
        match self {
            Start(_) | Cancel { .. } | Stop | Error { .. } | Interruption
            | PauseProcessor(_) | ResumeProcessor(_) | Metrics(_) => FrameKind::System,

            End | TtsStarted | TtsStopped | LlmResponseStart { .. } | LlmResponseEnd
            | FunctionCall(_) | FunctionCallResult(_) | LlmMessagesAppend { .. }
            | LlmMessagesReplace { .. } | LlmSetTools(_) | LlmSetToolChoice(_)
            | LlmConfigureOutput { .. } | LlmRun | UpdateSettings(_) => FrameKind::Control,

            InputAudio(_) | OutputAudio(_) | TtsAudio(_) | Text(_) | LlmText(_)
            | Transcription(_) | InterimTranscription(_) | Image(_)
            | UserStartedSpeaking | UserStoppedSpeaking | BotStartedSpeaking
            | BotStoppedSpeaking | InputTransportMessage(_) | OutputTransportMessage(_)
            | OutputTransportMessageUrgent(_) => FrameKind::Data,
        }
    }

    /// Returns the static type name used for debugging and logging.
    pub fn name(&self) -> &'static str {
        use FramePayload::*;
        match self {
            Start(_) => "StartFrame",
            Cancel { .. } => "CancelFrame",
            Stop => "StopFrame",
            Error { .. } => "ErrorFrame",
            Interruption => "InterruptionFrame",
            PauseProcessor(_) => "PauseProcessorFrame",
            ResumeProcessor(_) => "ResumeProcessorFrame",
            Metrics(_) => "MetricsFrame",
            End => "EndFrame",
            TtsStarted => "TTSStartedFrame",
            TtsStopped => "TTSStoppedFrame",
            LlmResponseStart { .. } => "LLMResponseStartFrame",
            LlmResponseEnd => "LLMResponseEndFrame",
            FunctionCall(_) => "FunctionCallFrame",
            FunctionCallResult(_) => "FunctionCallResultFrame",
            LlmMessagesAppend { .. } => "LLMMessagesAppendFrame",
            LlmMessagesReplace { .. } => "LLMMessagesReplaceFrame",
            LlmSetTools(_) => "LLMSetToolsFrame",
            LlmSetToolChoice(_) => "LLMSetToolChoiceFrame",
            LlmConfigureOutput { .. } => "LLMConfigureOutputFrame",
            LlmRun => "LLMRunFrame",
            UpdateSettings(_) => "UpdateSettingsFrame",
            InputAudio(_) => "InputAudioFrame",
            OutputAudio(_) => "OutputAudioFrame",
            TtsAudio(_) => "TTSAudioFrame",
            Text(_) => "TextFrame",
            LlmText(_) => "LLMTextFrame",
            Transcription(_) => "TranscriptionFrame",
            InterimTranscription(_) => "InterimTranscriptionFrame",
            Image(_) => "ImageFrame",
            UserStartedSpeaking => "UserStartedSpeakingFrame",
            UserStoppedSpeaking => "UserStoppedSpeakingFrame",
            BotStartedSpeaking => "BotStartedSpeakingFrame",
            BotStoppedSpeaking => "BotStoppedSpeakingFrame",
            InputTransportMessage(_) => "InputTransportMessageFrame",
            OutputTransportMessage(_) => "OutputTransportMessageFrame",
            OutputTransportMessageUrgent(_) => "OutputTransportMessageUrgentFrame",
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Transport source/destination info, boxed to save space when unused.
#[derive(Debug, Clone, Default)]
pub struct TransportInfo {
    /// Name of the transport source that created this frame.
    pub source: Option<String>,
    /// Name of the transport destination for this frame.
    pub destination: Option<String>,
}

/// Returns a reference to a static empty metadata map.
fn empty_metadata() -> &'static HashMap<String, serde_json::Value> {
    use std::sync::OnceLock;
    static EMPTY: OnceLock<HashMap<String, serde_json::Value>> = OnceLock::new();
    EMPTY.get_or_init(HashMap::new)
}

/// The unit of data flowing through the pipeline.
///
/// Every frame has a process-unique [`id`](Frame::id) that is strictly
/// increasing in creation order, an optional presentation timestamp, a
/// lazily-allocated metadata map, optional transport source/destination
/// names, and a tagged [`FramePayload`].
///
/// Frames are value-like: once constructed they are not mutated apart from
/// metadata annotation, and they move through queues by value so a frame is
/// never held by two processors simultaneously.
#[derive(Debug, Clone)]
pub struct Frame {
    id: u64,
    pts: Option<u64>,
    metadata: Option<Box<HashMap<String, serde_json::Value>>>,
    transport: Option<Box<TransportInfo>>,
    payload: FramePayload,
}

impl Frame {
    /// Create a new frame with a fresh unique id.
    pub fn new(payload: FramePayload) -> Self {
        Self {
            id: next_object_id(),
            pts: None,
            metadata: None,
            transport: None,
            payload,
        }
    }

    /// Unique numeric identifier for this frame instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Static type name (e.g. `"TextFrame"`).
    pub fn name(&self) -> &'static str {
        self.payload.name()
    }

    /// The frame's ordering category.
    pub fn kind(&self) -> FrameKind {
        self.payload.kind()
    }

    /// Presentation timestamp in nanoseconds, or `None`.
    pub fn pts(&self) -> Option<u64> {
        self.pts
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: Option<u64>) {
        self.pts = pts;
    }

    /// Arbitrary key-value metadata.
    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        self.metadata.as_deref().unwrap_or_else(|| empty_metadata())
    }

    /// Mutable access to metadata, allocating the map on first use.
    pub fn metadata_mut(&mut self) -> &mut HashMap<String, serde_json::Value> {
        self.metadata.get_or_insert_with(Default::default)
    }

    /// Name of the transport source that created this frame.
    pub fn transport_source(&self) -> Option<&str> {
        self.transport.as_ref().and_then(|t| t.source.as_deref())
    }

    /// Set the transport source name.
    pub fn set_transport_source(&mut self, source: Option<String>) {
        if source.is_some() || self.transport.is_some() {
            let t = self.transport.get_or_insert_with(Default::default);
            t.source = source;
        }
    }

    /// Name of the transport destination for this frame.
    pub fn transport_destination(&self) -> Option<&str> {
        self.transport
            .as_ref()
            .and_then(|t| t.destination.as_deref())
    }

    /// Set the transport destination name.
    pub fn set_transport_destination(&mut self, dest: Option<String>) {
        if dest.is_some() || self.transport.is_some() {
            let t = self.transport.get_or_insert_with(Default::default);
            t.destination = dest;
        }
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    /// Mutably borrow the payload.
    pub fn payload_mut(&mut self) -> &mut FramePayload {
        &mut self.payload
    }

    /// Consume the frame and return its payload.
    pub fn into_payload(self) -> FramePayload {
        self.payload
    }

    // -- convenience constructors -------------------------------------------

    /// A start frame with the given settings.
    pub fn start(settings: StartSettings) -> Self {
        Self::new(FramePayload::Start(settings))
    }

    /// A cancel frame with an optional reason.
    pub fn cancel(reason: Option<String>) -> Self {
        Self::new(FramePayload::Cancel { reason })
    }

    /// A stop frame.
    pub fn stop() -> Self {
        Self::new(FramePayload::Stop)
    }

    /// An error frame.
    pub fn error(message: impl Into<String>, fatal: bool) -> Self {
        Self::new(FramePayload::Error {
            message: message.into(),
            fatal,
        })
    }

    /// An interruption frame.
    pub fn interruption() -> Self {
        Self::new(FramePayload::Interruption)
    }

    /// An end-of-stream frame.
    pub fn end() -> Self {
        Self::new(FramePayload::End)
    }

    /// A text frame.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FramePayload::Text(TextData::new(text)))
    }

    /// A text frame with explicit TTS skipping.
    pub fn text_with_skip(text: impl Into<String>, skip_tts: bool) -> Self {
        Self::new(FramePayload::Text(TextData {
            text: text.into(),
            skip_tts,
        }))
    }

    /// A raw input audio frame.
    pub fn input_audio(audio: Vec<u8>, sample_rate: u32, num_channels: u32) -> Self {
        Self::new(FramePayload::InputAudio(AudioData::new(
            audio,
            sample_rate,
            num_channels,
        )))
    }

    /// A raw output audio frame.
    pub fn output_audio(audio: Vec<u8>, sample_rate: u32, num_channels: u32) -> Self {
        Self::new(FramePayload::OutputAudio(AudioData::new(
            audio,
            sample_rate,
            num_channels,
        )))
    }

    /// An audio frame produced by speech synthesis.
    pub fn tts_audio(audio: Vec<u8>, sample_rate: u32, num_channels: u32) -> Self {
        Self::new(FramePayload::TtsAudio(AudioData::new(
            audio,
            sample_rate,
            num_channels,
        )))
    }

    /// A final transcription frame.
    pub fn transcription(
        text: impl Into<String>,
        user_id: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self::new(FramePayload::Transcription(TranscriptionData {
            text: text.into(),
            user_id: user_id.into(),
            timestamp: timestamp.into(),
            language: None,
            raw: None,
        }))
    }
}

impl From<FramePayload> for Frame {
    fn from(payload: FramePayload) -> Self {
        Frame::new(payload)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            FramePayload::Text(t) | FramePayload::LlmText(t) => {
                write!(
                    f,
                    "{}(pts: {}, text: [{}])",
                    self.name(),
                    format_pts(self.pts),
                    t.text
                )
            }
            FramePayload::Transcription(t) => {
                write!(
                    f,
                    "{}(user: {}, text: [{}], language: {:?}, timestamp: {})",
                    self.name(),
                    t.user_id,
                    t.text,
                    t.language,
                    t.timestamp
                )
            }
            FramePayload::InterimTranscription(t) => {
                write!(
                    f,
                    "{}(user: {}, text: [{}], timestamp: {})",
                    self.name(),
                    t.user_id,
                    t.text,
                    t.timestamp
                )
            }
            FramePayload::InputAudio(a)
            | FramePayload::OutputAudio(a)
            | FramePayload::TtsAudio(a) => {
                write!(
                    f,
                    "{}(pts: {}, size: {}, frames: {}, sample_rate: {}, channels: {})",
                    self.name(),
                    format_pts(self.pts),
                    a.audio.len(),
                    a.num_frames,
                    a.sample_rate,
                    a.num_channels
                )
            }
            FramePayload::Error { message, fatal } => {
                write!(f, "{}(error: {}, fatal: {})", self.name(), message, fatal)
            }
            FramePayload::Cancel { reason } => {
                write!(f, "{}(reason: {:?})", self.name(), reason)
            }
            FramePayload::FunctionCall(call) => {
                write!(
                    f,
                    "{}(id: {}, name: {})",
                    self.name(),
                    call.call_id,
                    call.name
                )
            }
            _ => write!(f, "{}", self.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

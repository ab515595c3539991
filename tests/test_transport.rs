// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Transport ingress/egress behavior, including the full
//! VAD -> batcher -> batch STT chain.

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{collecting_callback, frame_names, loud_chunk, silent_chunk, wait_until};
use voxflow::prelude::*;

/// Feeds a fixed sequence of raw buffers, then reports end of stream.
struct ScriptedInput {
    buffers: VecDeque<Vec<u8>>,
}

#[async_trait]
impl TransportInput for ScriptedInput {
    async fn receive_audio(&mut self) -> Option<Vec<u8>> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.buffers.pop_front()
    }
}

struct StubStt {
    transcripts: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl SpeechToText for StubStt {
    async fn transcribe(
        &mut self,
        audio: &[u8],
        _sample_rate: u32,
        _num_channels: u32,
    ) -> Result<TranscriptionResult, StageError> {
        self.transcripts.lock().expect("transcripts lock").push(audio.len());
        Ok(TranscriptionResult {
            text: "utterance".into(),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct CapturingOutput {
    audio_bytes: Arc<Mutex<usize>>,
}

#[async_trait]
impl TransportOutput for CapturingOutput {
    async fn send_audio(&mut self, frame: &Frame) -> Result<(), StageError> {
        if let FramePayload::OutputAudio(audio) = frame.payload() {
            *self.audio_bytes.lock().expect("audio lock") += audio.audio.len();
        }
        Ok(())
    }

    async fn send_message(&mut self, _frame: &Frame) -> Result<(), StageError> {
        Ok(())
    }
}

#[tokio::test]
async fn vad_batcher_stt_chain_produces_one_utterance() {
    // Four loud 20 ms frames, then five silent ones.
    let mut buffers = VecDeque::new();
    for _ in 0..4 {
        buffers.push_back(loud_chunk());
    }
    for _ in 0..5 {
        buffers.push_back(silent_chunk());
    }

    let params = TransportParams {
        vad: VadParams {
            enabled: true,
            threshold: 0.01,
            start_frames: 2,
            stop_frames: 3,
        },
        ..Default::default()
    };

    let transcripts = Arc::new(Mutex::new(Vec::new()));
    let (callback, seen) = collecting_callback();
    let stages = vec![
        Processor::with_defaults(InputTransportStage::new(ScriptedInput { buffers }, params)),
        Processor::with_defaults(AudioBatcherStage::new(BatcherConfig::default())),
        Processor::with_defaults(SttStage::new(
            StubStt {
                transcripts: transcripts.clone(),
            },
            SttConfig::default(),
        )),
    ];
    let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None);
    pipeline.start().await.expect("start");

    assert!(wait_until(|| seen.lock().unwrap().len() == 4, 3000).await);
    assert_eq!(
        frame_names(&seen),
        vec![
            "UserStartedSpeakingFrame",
            "UserStoppedSpeakingFrame",
            "InputAudioFrame",
            "TranscriptionFrame",
        ]
    );

    // The utterance holds exactly the four loud frames: one from the
    // batcher's pre-roll, three forwarded after the start transition.
    match seen.lock().unwrap()[2].payload() {
        FramePayload::InputAudio(audio) => {
            assert_eq!(audio.audio.len(), 4 * 640);
            assert_eq!(audio.sample_rate, 16000);
            assert_eq!(audio.num_channels, 1);
        }
        other => panic!("expected InputAudioFrame, got {}", other.name()),
    }
    match seen.lock().unwrap()[3].payload() {
        FramePayload::Transcription(t) => assert_eq!(t.text, "utterance"),
        other => panic!("expected TranscriptionFrame, got {}", other.name()),
    }
    assert_eq!(*transcripts.lock().unwrap(), vec![4 * 640]);

    pipeline.stop().await;
}

#[tokio::test]
async fn zero_threshold_classifies_every_frame_as_speech() {
    let mut buffers = VecDeque::new();
    buffers.push_back(silent_chunk());
    buffers.push_back(silent_chunk());

    let params = TransportParams {
        vad: VadParams {
            enabled: true,
            threshold: 0.0,
            start_frames: 1,
            stop_frames: 1,
        },
        ..Default::default()
    };

    let (callback, seen) = collecting_callback();
    let stages = vec![Processor::with_defaults(InputTransportStage::new(
        ScriptedInput { buffers },
        params,
    ))];
    let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None);
    pipeline.start().await.expect("start");

    // Even silence counts as speech: a start transition plus both frames.
    assert!(wait_until(|| seen.lock().unwrap().len() == 3, 3000).await);
    assert_eq!(
        frame_names(&seen),
        vec![
            "UserStartedSpeakingFrame",
            "InputAudioFrame",
            "InputAudioFrame",
        ]
    );

    pipeline.stop().await;
}

#[tokio::test]
async fn full_threshold_classifies_nothing_as_speech() {
    // Include the loudest possible PCM16 chunk: all samples at -32768, whose
    // normalized RMS clamps to exactly 1.0.
    let mut full_scale = Vec::with_capacity(640);
    for _ in 0..320 {
        full_scale.extend_from_slice(&i16::MIN.to_le_bytes());
    }

    let mut buffers = VecDeque::new();
    for _ in 0..3 {
        buffers.push_back(loud_chunk());
    }
    buffers.push_back(full_scale);

    let params = TransportParams {
        vad: VadParams {
            enabled: true,
            threshold: 1.0,
            start_frames: 1,
            stop_frames: 1,
        },
        ..Default::default()
    };

    let (callback, seen) = collecting_callback();
    let stages = vec![Processor::with_defaults(InputTransportStage::new(
        ScriptedInput { buffers },
        params,
    ))];
    let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None);
    pipeline.start().await.expect("start");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(seen.lock().unwrap().is_empty());

    pipeline.stop().await;
}

#[tokio::test]
async fn egress_drains_tts_audio_and_reports_bot_speech() {
    let output_adapter = CapturingOutput::default();
    let audio_bytes = output_adapter.audio_bytes.clone();

    let (callback, seen) = collecting_callback();
    let stages = vec![Processor::with_defaults(OutputTransportStage::new(
        output_adapter,
        TransportParams::default(),
    ))];
    let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None);
    pipeline.start().await.expect("start");

    pipeline.queue(Frame::new(FramePayload::TtsStarted));
    pipeline.queue(Frame::tts_audio(vec![0u8; 4800], 24000, 1));
    pipeline.queue(Frame::new(FramePayload::TtsStopped));

    assert!(wait_until(|| *audio_bytes.lock().unwrap() == 4800, 3000).await);
    assert!(wait_until(|| seen.lock().unwrap().len() == 2, 3000).await);
    assert_eq!(
        frame_names(&seen),
        vec!["BotStartedSpeakingFrame", "BotStoppedSpeakingFrame"]
    );

    pipeline.stop().await;
}

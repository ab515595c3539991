// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline orchestration for connecting and managing frame processors.
//!
//! A [`Pipeline`] wraps an ordered list of processors with a Source and a
//! Sink (processors themselves), links adjacent pairs in both directions, and
//! manages the collective lifecycle. Frames queued on the pipeline enter at
//! the Source tagged downstream; frames that exit at the Sink are handed to a
//! caller-supplied callback, and frames that travel all the way upstream to
//! the Source are handed to a second callback.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::frames::{Frame, FrameDirection, StartSettings};
use crate::metrics::MetricsSnapshot;
use crate::processors::runtime::{FrameHandler, Processor, StageContext, StageError};
use crate::processors::ProcessorConfig;
use crate::utils::instance_count;

/// An async callback receiving frames that exit the pipeline.
pub type FrameCallback =
    Arc<dyn Fn(Frame) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`FrameCallback`].
pub fn frame_callback<F, Fut>(f: F) -> FrameCallback
where
    F: Fn(Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |frame| Box::pin(f(frame)))
}

// ---------------------------------------------------------------------------
// Source / Sink boundary stages
// ---------------------------------------------------------------------------

/// Boundary stage at the head of the chain.
///
/// Downstream frames are pushed to the first processor; frames arriving from
/// within the pipeline (upstream direction) are handed to the caller's
/// upstream callback.
struct SourceStage {
    upstream_callback: Option<FrameCallback>,
}

#[async_trait]
impl FrameHandler for SourceStage {
    fn name(&self) -> &'static str {
        "PipelineSource"
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match direction {
            FrameDirection::Downstream => ctx.push(frame, direction),
            FrameDirection::Upstream => match &self.upstream_callback {
                Some(callback) => callback(frame).await,
                None => {
                    tracing::debug!(frame = %frame, "no upstream callback, dropping frame");
                }
            },
        }
        Ok(())
    }
}

/// Boundary stage at the tail of the chain.
///
/// Downstream frames are handed to the caller's downstream callback; frames
/// deposited here tagged upstream are forwarded into the chain.
struct SinkStage {
    downstream_callback: Option<FrameCallback>,
}

#[async_trait]
impl FrameHandler for SinkStage {
    fn name(&self) -> &'static str {
        "PipelineSink"
    }

    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError> {
        match direction {
            FrameDirection::Downstream => match &self.downstream_callback {
                Some(callback) => callback(frame).await,
                None => {
                    tracing::debug!(frame = %frame, "no downstream callback, dropping frame");
                }
            },
            FrameDirection::Upstream => ctx.push(frame, direction),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Parameters applied when the pipeline starts.
///
/// They populate the start frame the pipeline queues first, which every
/// processor uses to record its interruption policy.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    pub allow_interruptions: bool,
    pub enable_metrics: bool,
    pub audio_in_sample_rate: u32,
    pub audio_out_sample_rate: u32,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            allow_interruptions: false,
            enable_metrics: false,
            audio_in_sample_rate: 16000,
            audio_out_sample_rate: 24000,
        }
    }
}

/// An ordered chain of processors bracketed by a Source and a Sink.
pub struct Pipeline {
    name: String,
    params: PipelineParams,
    processors: Vec<Processor>,
    running: bool,
}

impl Pipeline {
    /// Build a pipeline from an ordered list of processors, without exit
    /// callbacks.
    pub fn new(stages: Vec<Processor>) -> Self {
        Self::with_callbacks(stages, None, None)
    }

    /// Build a pipeline with callbacks for frames exiting at the Sink
    /// (downstream) and at the Source (upstream).
    pub fn with_callbacks(
        stages: Vec<Processor>,
        downstream_callback: Option<FrameCallback>,
        upstream_callback: Option<FrameCallback>,
    ) -> Self {
        let name = format!("Pipeline#{}", instance_count("Pipeline"));
        let source = Processor::new(
            SourceStage { upstream_callback },
            ProcessorConfig::named(format!("{}::Source", name)),
        );
        let sink = Processor::new(
            SinkStage {
                downstream_callback,
            },
            ProcessorConfig::named(format!("{}::Sink", name)),
        );

        let mut processors = Vec::with_capacity(stages.len() + 2);
        processors.push(source);
        processors.extend(stages);
        processors.push(sink);

        for i in 0..processors.len() - 1 {
            processors[i].link(&processors[i + 1]);
        }

        Self {
            name,
            params: PipelineParams::default(),
            processors,
            running: false,
        }
    }

    /// Override the start parameters.
    pub fn with_params(mut self, params: PipelineParams) -> Self {
        self.params = params;
        self
    }

    /// The pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All processors including the Source (first) and Sink (last).
    pub fn processors(&self) -> &[Processor] {
        &self.processors
    }

    /// Whether the pipeline is running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Set up every processor in order, then start them all and queue the
    /// initial start frame.
    ///
    /// A setup failure aborts the start: processors that were already set up
    /// are cleaned up in reverse order and none is left running.
    pub async fn start(&mut self) -> Result<(), StageError> {
        for i in 0..self.processors.len() {
            if let Err(e) = self.processors[i].setup().await {
                tracing::error!(
                    pipeline = %self.name,
                    processor = %self.processors[i].name(),
                    "setup failed: {e}"
                );
                for j in (0..i).rev() {
                    self.processors[j].cleanup().await;
                }
                return Err(e);
            }
        }

        for processor in &mut self.processors {
            processor.start();
        }
        self.running = true;
        tracing::debug!(pipeline = %self.name, "pipeline started");

        self.queue(Frame::start(StartSettings {
            audio_in_sample_rate: self.params.audio_in_sample_rate,
            audio_out_sample_rate: self.params.audio_out_sample_rate,
            allow_interruptions: self.params.allow_interruptions,
            enable_metrics: self.params.enable_metrics,
        }));
        Ok(())
    }

    /// Stop every processor in reverse order; each stop drains the current
    /// frame, awaits the scheduler, and runs cleanup.
    pub async fn stop(&mut self) {
        for processor in self.processors.iter_mut().rev() {
            processor.stop().await;
        }
        self.running = false;
        tracing::debug!(pipeline = %self.name, "pipeline stopped");
    }

    /// Queue a frame at the Source, tagged downstream.
    pub fn queue(&self, frame: Frame) {
        self.processors[0].queue_directed(frame, FrameDirection::Downstream);
    }

    /// Deposit a frame at a pipeline boundary with an explicit direction.
    ///
    /// Downstream deposits at the Source; upstream deposits at the Sink, from
    /// which the frame travels back through the chain.
    pub fn push(&self, frame: Frame, direction: FrameDirection) {
        match direction {
            FrameDirection::Downstream => self.queue(frame),
            FrameDirection::Upstream => {
                let sink = self
                    .processors
                    .last()
                    .expect("pipeline always has a sink");
                sink.queue_directed(frame, FrameDirection::Upstream);
            }
        }
    }

    /// Point-in-time metrics for every processor, Source and Sink included.
    pub fn metrics(&self) -> Vec<MetricsSnapshot> {
        self.processors
            .iter()
            .map(|p| p.metrics_snapshot())
            .collect()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("processors", &self.processors.len())
            .field("running", &self.running)
            .finish()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::frames::FramePayload;
    use crate::processors::runtime::Passthrough;

    fn collecting_callback() -> (FrameCallback, Arc<Mutex<Vec<Frame>>>) {
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

    async fn wait_until(mut condition: impl FnMut() -> bool, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn frames_flow_source_to_sink_callback() {
        let (callback, seen) = collecting_callback();
        let stages = vec![Processor::with_defaults(Passthrough)];
        let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None);

        pipeline.start().await.expect("start");
        pipeline.queue(Frame::text("through"));

        assert!(wait_until(|| seen.lock().unwrap().len() == 1, 1000).await);
        assert_eq!(seen.lock().unwrap()[0].name(), "TextFrame");

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn upstream_frames_reach_upstream_callback() {
        struct EchoUpstream;

        #[async_trait]
        impl FrameHandler for EchoUpstream {
            fn name(&self) -> &'static str {
                "EchoUpstream"
            }

            async fn handle_frame(
                &mut self,
                frame: Frame,
                direction: FrameDirection,
                ctx: &StageContext,
            ) -> Result<(), StageError> {
                match frame.payload() {
                    FramePayload::Text(_) => ctx.push(frame, FrameDirection::Upstream),
                    _ => ctx.push(frame, direction),
                }
                Ok(())
            }
        }

        let (callback, seen) = collecting_callback();
        let stages = vec![Processor::with_defaults(EchoUpstream)];
        let mut pipeline = Pipeline::with_callbacks(stages, None, Some(callback));

        pipeline.start().await.expect("start");
        pipeline.queue(Frame::text("bounce back"));

        assert!(wait_until(|| seen.lock().unwrap().len() == 1, 1000).await);
        match seen.lock().unwrap()[0].payload() {
            FramePayload::Text(t) => assert_eq!(t.text, "bounce back"),
            other => panic!("expected TextFrame, got {}", other.name()),
        }

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn push_upstream_enters_at_sink() {
        let (callback, seen) = collecting_callback();
        let stages = vec![Processor::with_defaults(Passthrough)];
        let mut pipeline = Pipeline::with_callbacks(stages, None, Some(callback));

        pipeline.start().await.expect("start");
        pipeline.push(
            Frame::new(FramePayload::UserStartedSpeaking),
            FrameDirection::Upstream,
        );

        // The frame traverses sink -> stage -> source and surfaces upstream.
        assert!(wait_until(|| seen.lock().unwrap().len() == 1, 1000).await);
        assert_eq!(seen.lock().unwrap()[0].name(), "UserStartedSpeakingFrame");

        pipeline.stop().await;
    }

    #[tokio::test]
    async fn setup_failure_aborts_start() {
        struct FailingSetup;

        #[async_trait]
        impl FrameHandler for FailingSetup {
            fn name(&self) -> &'static str {
                "FailingSetup"
            }

            async fn setup(&mut self, _ctx: &StageContext) -> Result<(), StageError> {
                Err(StageError::setup("resource unavailable"))
            }

            async fn handle_frame(
                &mut self,
                frame: Frame,
                direction: FrameDirection,
                ctx: &StageContext,
            ) -> Result<(), StageError> {
                ctx.push(frame, direction);
                Ok(())
            }
        }

        let stages = vec![
            Processor::with_defaults(Passthrough),
            Processor::with_defaults(FailingSetup),
        ];
        let mut pipeline = Pipeline::new(stages);

        assert!(pipeline.start().await.is_err());
        assert!(!pipeline.is_running());
        for processor in pipeline.processors() {
            assert_ne!(
                processor.state(),
                crate::processors::runtime::ProcessorState::Running
            );
        }
    }

    #[tokio::test]
    async fn metrics_cover_all_processors() {
        let stages = vec![Processor::with_defaults(Passthrough)];
        let mut pipeline = Pipeline::new(stages);
        pipeline.start().await.expect("start");

        pipeline.queue(Frame::text("count me"));
        assert!(
            wait_until(
                || pipeline.metrics().iter().any(|m| m.handled_data > 0),
                1000
            )
            .await
        );

        // Source + stage + sink.
        assert_eq!(pipeline.metrics().len(), 3);
        pipeline.stop().await;
    }
}

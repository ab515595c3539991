// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The per-stage processor runtime.
//!
//! A [`Processor`] is a single-stage compute unit: an identity, an optional
//! downstream and upstream peer, two FIFO queues, a scheduler task, and a
//! user-defined per-frame [`FrameHandler`].
//!
//! # Scheduling model
//!
//! Each processor runs one cooperative scheduler task. Every iteration
//! dequeues from the **priority queue** first (System frames), then from the
//! **ordinary queue** (Data and Control frames) when not paused, and yields
//! for about a millisecond when both are empty. One frame is handled to
//! completion per iteration.
//!
//! # Built-in system-frame handling
//!
//! Before the user handler runs, the runtime intercepts a small closed set of
//! frames: start (records whether interruptions are allowed), cancel and
//! interruption (discard the ordinary queue when interruptions are allowed),
//! stop (forward first, then schedule the loop to exit), pause/resume of a
//! single processor, and end. All intercepted frames are forwarded to the
//! peer in their direction of travel; the user handler never sees them.
//!
//! Handler errors are recovered locally: the runtime counts them, logs, and
//! pushes a non-fatal error frame downstream, then keeps running.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frames::{Frame, FrameDirection, FramePayload};
use crate::metrics::{MetricsSnapshot, ProcessorMetrics, QueueDepths};
use crate::processors::ProcessorConfig;
use crate::utils::{instance_count, next_object_id};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error raised by frame handlers and service adapters.
#[derive(Debug, Error)]
pub enum StageError {
    /// An external service (STT, LLM, TTS) failed.
    #[error("service error: {0}")]
    Service(String),
    /// A transport-level operation failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// Resource acquisition during setup failed.
    #[error("setup failed: {0}")]
    Setup(String),
}

impl StageError {
    pub fn service(message: impl Into<String>) -> Self {
        StageError::Service(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        StageError::Transport(message.into())
    }

    pub fn setup(message: impl Into<String>) -> Self {
        StageError::Setup(message.into())
    }
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// A frame tagged with its flow direction.
#[derive(Debug)]
pub struct DirectedFrame {
    pub frame: Frame,
    pub direction: FrameDirection,
}

/// Cloneable producer half of a processor's queues.
///
/// System frames are routed to the priority queue; Data and Control frames to
/// the ordinary queue. Queueing is non-blocking and always succeeds; if the
/// processor has already shut down the frame is dropped with a warning.
#[derive(Clone)]
pub struct QueueHandle {
    id: u64,
    name: Arc<str>,
    priority_tx: mpsc::UnboundedSender<DirectedFrame>,
    ordinary_tx: mpsc::UnboundedSender<DirectedFrame>,
    depths: Arc<QueueDepths>,
}

impl QueueHandle {
    /// Unique id of the owning processor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the owning processor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a frame to the owning processor's queues.
    pub fn queue(&self, frame: Frame, direction: FrameDirection) {
        let (tx, depth) = match frame.kind() {
            crate::frames::FrameKind::System => (&self.priority_tx, &self.depths.priority),
            _ => (&self.ordinary_tx, &self.depths.ordinary),
        };
        depth.fetch_add(1, Ordering::Relaxed);
        if tx.send(DirectedFrame { frame, direction }).is_err() {
            depth.fetch_sub(1, Ordering::Relaxed);
            tracing::warn!(processor = %self.name, "queue receiver dropped, frame lost");
        }
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Non-owning reference to a neighboring processor's queues.
type NeighborLink = Arc<Mutex<Option<QueueHandle>>>;

// ---------------------------------------------------------------------------
// StageContext
// ---------------------------------------------------------------------------

/// Context handed to a [`FrameHandler`] for emitting frames.
///
/// Carries the processor's own queue handle (for external event callbacks
/// that must preserve the single-writer discipline) and non-owning links to
/// both neighbors.
#[derive(Debug, Clone)]
pub struct StageContext {
    id: u64,
    name: Arc<str>,
    own: QueueHandle,
    downstream: NeighborLink,
    upstream: NeighborLink,
}

impl StageContext {
    /// Unique id of the owning processor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the owning processor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A clone of the processor's own queue handle.
    ///
    /// Background tasks and external event callbacks use this to post frames
    /// back into the processor's queue machinery.
    pub fn own_queue(&self) -> QueueHandle {
        self.own.clone()
    }

    /// Synchronously enqueue a frame on the neighbor in the given direction.
    ///
    /// If there is no neighbor the frame is dropped with a log. Never
    /// re-enters this processor's own queues.
    pub fn push(&self, frame: Frame, direction: FrameDirection) {
        let link = match direction {
            FrameDirection::Downstream => &self.downstream,
            FrameDirection::Upstream => &self.upstream,
        };
        let neighbor = link.lock().expect("neighbor link poisoned").clone();
        match neighbor {
            Some(handle) => handle.queue(frame, direction),
            None => {
                tracing::debug!(
                    processor = %self.name,
                    frame = %frame,
                    ?direction,
                    "no neighbor in direction, dropping frame"
                );
            }
        }
    }

    /// Synthesize and push a downstream error frame.
    pub fn push_error(&self, message: impl Into<String>, fatal: bool) {
        self.push(Frame::error(message, fatal), FrameDirection::Downstream);
    }
}

// ---------------------------------------------------------------------------
// FrameHandler
// ---------------------------------------------------------------------------

/// User-defined per-frame behavior of a processor.
///
/// The runtime serializes invocations: `handle_frame` is called for one frame
/// at a time, to completion, on the processor's scheduler task. Handlers may
/// suspend; suspensions are cooperative.
#[async_trait]
pub trait FrameHandler: Send + 'static {
    /// Short type name used for auto-generated processor names.
    fn name(&self) -> &'static str;

    /// Lifecycle: acquire resources. Called by the orchestrator before start.
    async fn setup(&mut self, _ctx: &StageContext) -> Result<(), StageError> {
        Ok(())
    }

    /// Process a single frame.
    ///
    /// Returning an error does not terminate the scheduler; the runtime
    /// recovers by pushing a non-fatal error frame downstream.
    async fn handle_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &StageContext,
    ) -> Result<(), StageError>;

    /// Lifecycle: release resources. Runs after the scheduler loop exits.
    async fn cleanup(&mut self) -> Result<(), StageError> {
        Ok(())
    }
}

/// A handler that forwards every frame unchanged in its direction of travel.
#[derive(Debug, Default)]
pub struct Passthrough;

#[async_trait]
impl FrameHandler for Passthrough {
    fn name(&self) -> &'static str {
        "Passthrough"
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

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Lifecycle state of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Constructed but not yet started.
    Constructed,
    /// Scheduler task is running.
    Running,
    /// Stopped; the scheduler has exited and cleanup has run.
    Stopped,
}

#[derive(Debug, Default)]
struct StageFlags {
    paused: AtomicBool,
    stopping: AtomicBool,
    allow_interruptions: AtomicBool,
    running: AtomicBool,
    stopped: AtomicBool,
}

/// A single-stage compute unit with two FIFO queues and a scheduler task.
pub struct Processor {
    id: u64,
    name: Arc<str>,
    config: ProcessorConfig,
    handle: QueueHandle,
    priority_rx: Option<mpsc::UnboundedReceiver<DirectedFrame>>,
    ordinary_rx: Option<mpsc::UnboundedReceiver<DirectedFrame>>,
    downstream: NeighborLink,
    upstream: NeighborLink,
    handler: Option<Box<dyn FrameHandler>>,
    flags: Arc<StageFlags>,
    metrics: Arc<ProcessorMetrics>,
    task: Option<JoinHandle<()>>,
}

impl Processor {
    /// Create a new processor wrapping the given handler.
    pub fn new<H: FrameHandler>(handler: H, config: ProcessorConfig) -> Self {
        let id = config.id.unwrap_or_else(next_object_id);
        let name: Arc<str> = config
            .name
            .clone()
            .unwrap_or_else(|| format!("{}#{}", handler.name(), instance_count(handler.name())))
            .into();
        let depths = Arc::new(QueueDepths::default());
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let (ordinary_tx, ordinary_rx) = mpsc::unbounded_channel();
        let handle = QueueHandle {
            id,
            name: name.clone(),
            priority_tx,
            ordinary_tx,
            depths: depths.clone(),
        };
        Self {
            id,
            name,
            config,
            handle,
            priority_rx: Some(priority_rx),
            ordinary_rx: Some(ordinary_rx),
            downstream: Arc::new(Mutex::new(None)),
            upstream: Arc::new(Mutex::new(None)),
            handler: Some(Box::new(handler)),
            flags: Arc::new(StageFlags::default()),
            metrics: Arc::new(ProcessorMetrics::new(depths)),
            task: None,
        }
    }

    /// Create a processor with default configuration.
    pub fn with_defaults<H: FrameHandler>(handler: H) -> Self {
        Self::new(handler, ProcessorConfig::default())
    }

    /// Unique numeric identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        if self.flags.stopped.load(Ordering::Acquire) {
            ProcessorState::Stopped
        } else if self.flags.running.load(Ordering::Acquire) {
            ProcessorState::Running
        } else {
            ProcessorState::Constructed
        }
    }

    /// Whether the ordinary queue is currently paused.
    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::Acquire)
    }

    /// A clone of this processor's queue handle.
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Point-in-time counters and queue depths.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.name)
    }

    /// Establish bidirectional neighbor references with `downstream`.
    pub fn link(&self, downstream: &Processor) {
        *self.downstream.lock().expect("neighbor link poisoned") = Some(downstream.handle());
        *downstream.upstream.lock().expect("neighbor link poisoned") = Some(self.handle());
    }

    /// Append a frame to this processor's queues, tagged downstream.
    pub fn queue(&self, frame: Frame) {
        self.handle.queue(frame, FrameDirection::Downstream);
    }

    /// Append a frame to this processor's queues with an explicit direction.
    pub fn queue_directed(&self, frame: Frame, direction: FrameDirection) {
        self.handle.queue(frame, direction);
    }

    fn context(&self) -> StageContext {
        StageContext {
            id: self.id,
            name: self.name.clone(),
            own: self.handle.clone(),
            downstream: self.downstream.clone(),
            upstream: self.upstream.clone(),
        }
    }

    /// Lifecycle hook: acquire the handler's resources.
    pub async fn setup(&mut self) -> Result<(), StageError> {
        let ctx = self.context();
        match self.handler.as_mut() {
            Some(handler) => handler.setup(&ctx).await,
            None => Ok(()),
        }
    }

    /// Spawn the scheduler task. Idempotent once running.
    pub fn start(&mut self) {
        if self.task.is_some() || self.flags.stopped.load(Ordering::Acquire) {
            return;
        }
        let handler = match self.handler.take() {
            Some(handler) => handler,
            None => return,
        };
        let (priority_rx, ordinary_rx) = match (self.priority_rx.take(), self.ordinary_rx.take()) {
            (Some(p), Some(o)) => (p, o),
            _ => return,
        };

        let scheduler = Scheduler {
            name: self.name.clone(),
            config: self.config.clone(),
            handler,
            ctx: self.context(),
            priority_rx,
            ordinary_rx,
            flags: self.flags.clone(),
            metrics: self.metrics.clone(),
            depths: self.handle.depths.clone(),
        };

        self.flags.running.store(true, Ordering::Release);
        tracing::debug!(processor = %self.name, "processor started");
        self.task = Some(tokio::spawn(scheduler.run()));
    }

    /// Signal the scheduler to exit after the current frame, await it, and
    /// run cleanup. Idempotent.
    pub async fn stop(&mut self) {
        self.flags.stopping.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(processor = %self.name, "scheduler task failed: {e}");
            }
        } else if let Some(mut handler) = self.handler.take() {
            if let Err(e) = handler.cleanup().await {
                tracing::warn!(processor = %self.name, "cleanup failed: {e}");
            }
        }
        self.flags.running.store(false, Ordering::Release);
        self.flags.stopped.store(true, Ordering::Release);
    }

    /// Lifecycle hook: release resources of a processor that never started.
    ///
    /// For running processors cleanup happens inside [`stop`](Self::stop).
    pub async fn cleanup(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            if let Err(e) = handler.cleanup().await {
                tracing::warn!(processor = %self.name, "cleanup failed: {e}");
            }
        }
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Classification of runtime-intercepted frames.
enum BuiltIn {
    Start { allow_interruptions: bool },
    DiscardQueued,
    Stop,
    SetPaused { matched: bool, paused: bool },
    End,
}

struct Scheduler {
    name: Arc<str>,
    config: ProcessorConfig,
    handler: Box<dyn FrameHandler>,
    ctx: StageContext,
    priority_rx: mpsc::UnboundedReceiver<DirectedFrame>,
    ordinary_rx: mpsc::UnboundedReceiver<DirectedFrame>,
    flags: Arc<StageFlags>,
    metrics: Arc<ProcessorMetrics>,
    depths: Arc<QueueDepths>,
}

impl Scheduler {
    async fn run(mut self) {
        loop {
            if self.flags.stopping.load(Ordering::Acquire) {
                break;
            }

            // Priority queue first; system frames must never wait behind
            // content and keep draining even while paused.
            let directed = match self.priority_rx.try_recv() {
                Ok(d) => {
                    self.depths.priority.fetch_sub(1, Ordering::Relaxed);
                    Some(d)
                }
                Err(_) => {
                    if self.flags.paused.load(Ordering::Acquire) {
                        None
                    } else {
                        match self.ordinary_rx.try_recv() {
                            Ok(d) => {
                                self.depths.ordinary.fetch_sub(1, Ordering::Relaxed);
                                Some(d)
                            }
                            Err(_) => None,
                        }
                    }
                }
            };

            match directed {
                Some(directed) => self.dispatch(directed).await,
                None => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }

        if let Err(e) = self.handler.cleanup().await {
            tracing::warn!(processor = %self.name, "cleanup failed: {e}");
        }
        self.flags.running.store(false, Ordering::Release);
        self.flags.stopped.store(true, Ordering::Release);
        tracing::debug!(processor = %self.name, "processor stopped");
    }

    async fn dispatch(&mut self, directed: DirectedFrame) {
        let DirectedFrame { frame, direction } = directed;

        if self.config.enable_logging {
            tracing::trace!(processor = %self.name, frame = %frame, ?direction, "dispatching");
        }
        if self.config.enable_metrics {
            self.metrics.record(frame.kind());
        }

        let builtin = match frame.payload() {
            FramePayload::Start(settings) => Some(BuiltIn::Start {
                allow_interruptions: settings.allow_interruptions,
            }),
            FramePayload::Cancel { .. } | FramePayload::Interruption => {
                Some(BuiltIn::DiscardQueued)
            }
            FramePayload::Stop => Some(BuiltIn::Stop),
            FramePayload::PauseProcessor(target) => Some(BuiltIn::SetPaused {
                matched: target.matches(self.ctx.id(), &self.name),
                paused: true,
            }),
            FramePayload::ResumeProcessor(target) => Some(BuiltIn::SetPaused {
                matched: target.matches(self.ctx.id(), &self.name),
                paused: false,
            }),
            FramePayload::End => Some(BuiltIn::End),
            _ => None,
        };

        match builtin {
            Some(BuiltIn::Start {
                allow_interruptions,
            }) => {
                self.flags
                    .allow_interruptions
                    .store(allow_interruptions, Ordering::Release);
                self.ctx.push(frame, direction);
            }
            Some(BuiltIn::DiscardQueued) => {
                if self.flags.allow_interruptions.load(Ordering::Acquire) {
                    let discarded = self.discard_ordinary();
                    if discarded > 0 {
                        tracing::debug!(
                            processor = %self.name,
                            discarded,
                            "discarded queued content frames"
                        );
                    }
                }
                self.ctx.push(frame, direction);
            }
            Some(BuiltIn::Stop) => {
                // Forward before the loop exits so the stop frame keeps
                // traveling; cleanup runs after the current iteration.
                self.ctx.push(frame, direction);
                self.flags.stopping.store(true, Ordering::Release);
            }
            Some(BuiltIn::SetPaused { matched, paused }) => {
                if matched {
                    self.flags.paused.store(paused, Ordering::Release);
                    tracing::debug!(processor = %self.name, paused, "pause state changed");
                }
                self.ctx.push(frame, direction);
            }
            Some(BuiltIn::End) => {
                self.ctx.push(frame, direction);
            }
            None => {
                let result = AssertUnwindSafe(
                    self.handler.handle_frame(frame, direction, &self.ctx),
                )
                .catch_unwind()
                .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        self.metrics.record_error();
                        tracing::warn!(processor = %self.name, "handler error: {e}");
                        self.ctx.push_error(e.to_string(), false);
                    }
                    Err(panic_info) => {
                        let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        self.metrics.record_error();
                        tracing::error!(processor = %self.name, "handler panicked: {message}");
                        self.ctx
                            .push_error(format!("handler panicked: {message}"), false);
                    }
                }
            }
        }
    }

    fn discard_ordinary(&mut self) -> usize {
        let mut discarded = 0;
        while self.ordinary_rx.try_recv().is_ok() {
            self.depths.ordinary.fetch_sub(1, Ordering::Relaxed);
            discarded += 1;
        }
        discarded
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::StartSettings;

    /// Records every frame it sees, then forwards it.
    struct Recorder {
        seen: Arc<Mutex<Vec<Frame>>>,
    }

    #[async_trait]
    impl FrameHandler for Recorder {
        fn name(&self) -> &'static str {
            "Recorder"
        }

        async fn handle_frame(
            &mut self,
            frame: Frame,
            direction: FrameDirection,
            ctx: &StageContext,
        ) -> Result<(), StageError> {
            self.seen.lock().expect("seen lock").push(frame.clone());
            ctx.push(frame, direction);
            Ok(())
        }
    }

    fn recorder() -> (Processor, Arc<Mutex<Vec<Frame>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = Processor::with_defaults(Recorder { seen: seen.clone() });
        (processor, seen)
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
    async fn passthrough_forwards_downstream() {
        let mut upstream = Processor::with_defaults(Passthrough);
        let (mut sink, seen) = recorder();
        upstream.link(&sink);

        upstream.start();
        sink.start();

        upstream.queue(Frame::text("hello"));

        assert!(wait_until(|| seen.lock().unwrap().len() == 1, 1000).await);
        assert_eq!(seen.lock().unwrap()[0].name(), "TextFrame");

        upstream.stop().await;
        sink.stop().await;
    }

    #[tokio::test]
    async fn system_frames_preempt_queued_content() {
        let (mut stage, seen) = recorder();

        // Queue before starting so the ordering decision is entirely the
        // scheduler's: the error frame was queued last but must run first.
        stage.queue(Frame::text("first"));
        stage.queue(Frame::text("second"));
        stage.queue(Frame::error("urgent", false));
        stage.start();

        assert!(wait_until(|| seen.lock().unwrap().len() == 3, 1000).await);
        let names: Vec<&str> = seen.lock().unwrap().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["ErrorFrame", "TextFrame", "TextFrame"]);

        stage.stop().await;
    }

    #[tokio::test]
    async fn stop_frame_forwards_then_stops() {
        let mut first = Processor::with_defaults(Passthrough);
        let (mut second, seen) = recorder();
        first.link(&second);

        first.start();
        second.start();

        first.queue(Frame::text("before"));
        first.queue(Frame::stop());

        // The recorder sees the text; the stop frame is intercepted at both
        // stages but still traverses, stopping each.
        assert!(wait_until(|| seen.lock().unwrap().len() == 1, 1000).await);
        assert!(
            wait_until(|| first.state() == ProcessorState::Stopped, 1000).await,
            "first processor should stop itself"
        );
        assert!(wait_until(|| second.state() == ProcessorState::Stopped, 1000).await);

        first.stop().await;
        second.stop().await;
    }

    #[tokio::test]
    async fn handler_error_is_recovered() {
        struct Failing;

        #[async_trait]
        impl FrameHandler for Failing {
            fn name(&self) -> &'static str {
                "Failing"
            }

            async fn handle_frame(
                &mut self,
                frame: Frame,
                direction: FrameDirection,
                ctx: &StageContext,
            ) -> Result<(), StageError> {
                if matches!(frame.payload(), FramePayload::Text(_)) {
                    return Err(StageError::service("no text please"));
                }
                ctx.push(frame, direction);
                Ok(())
            }
        }

        let mut failing = Processor::with_defaults(Failing);
        let (mut sink, seen) = recorder();
        failing.link(&sink);
        failing.start();
        sink.start();

        failing.queue(Frame::text("boom"));
        failing.queue(Frame::end());

        // An error frame arrives downstream and the scheduler keeps going;
        // End is intercepted at the sink so only the error is recorded.
        assert!(wait_until(|| !seen.lock().unwrap().is_empty(), 1000).await);
        let frames = seen.lock().unwrap();
        match frames[0].payload() {
            FramePayload::Error { message, fatal } => {
                assert!(message.contains("no text please"));
                assert!(!fatal);
            }
            other => panic!("expected ErrorFrame, got {}", other.name()),
        }
        drop(frames);

        assert_eq!(failing.metrics_snapshot().errors, 1);
        assert_eq!(failing.state(), ProcessorState::Running);

        failing.stop().await;
        sink.stop().await;
    }

    #[tokio::test]
    async fn handler_panic_is_recovered() {
        struct Panicking;

        #[async_trait]
        impl FrameHandler for Panicking {
            fn name(&self) -> &'static str {
                "Panicking"
            }

            async fn handle_frame(
                &mut self,
                frame: Frame,
                direction: FrameDirection,
                ctx: &StageContext,
            ) -> Result<(), StageError> {
                if matches!(frame.payload(), FramePayload::Text(_)) {
                    panic!("handler blew up");
                }
                ctx.push(frame, direction);
                Ok(())
            }
        }

        let mut panicking = Processor::with_defaults(Panicking);
        let (mut sink, seen) = recorder();
        panicking.link(&sink);
        panicking.start();
        sink.start();

        panicking.queue(Frame::text("boom"));
        panicking.queue(Frame::new(FramePayload::TtsStarted));

        // The panic is contained: an error frame goes downstream and the
        // following frame is still processed.
        assert!(wait_until(|| seen.lock().unwrap().len() == 2, 1000).await);
        let frames = seen.lock().unwrap();
        match frames[0].payload() {
            FramePayload::Error { message, fatal } => {
                assert!(message.contains("handler blew up"));
                assert!(!fatal);
            }
            other => panic!("expected ErrorFrame, got {}", other.name()),
        }
        assert_eq!(frames[1].name(), "TTSStartedFrame");
        drop(frames);

        assert_eq!(panicking.state(), ProcessorState::Running);
        panicking.stop().await;
        sink.stop().await;
    }

    #[tokio::test]
    async fn pause_holds_ordinary_but_drains_priority() {
        let (mut stage, seen) = recorder();
        let name = stage.name().to_string();
        stage.start();

        stage.queue(Frame::new(FramePayload::PauseProcessor(
            crate::frames::StageRef::Name(name.clone()),
        )));
        assert!(wait_until(|| stage.is_paused(), 1000).await);

        stage.queue(Frame::text("held"));
        stage.queue(Frame::error("passes", false));

        // The system frame drains while paused; the text frame does not.
        assert!(wait_until(|| seen.lock().unwrap().len() == 1, 1000).await);
        assert_eq!(seen.lock().unwrap()[0].name(), "ErrorFrame");
        assert_eq!(stage.metrics_snapshot().ordinary_depth, 1);

        stage.queue(Frame::new(FramePayload::ResumeProcessor(
            crate::frames::StageRef::Name(name),
        )));

        assert!(wait_until(|| seen.lock().unwrap().len() == 2, 1000).await);
        assert_eq!(seen.lock().unwrap()[1].name(), "TextFrame");
        assert_eq!(stage.metrics_snapshot().ordinary_depth, 0);

        stage.stop().await;
    }

    #[tokio::test]
    async fn interruption_discards_ordinary_queue() {
        let (mut stage, seen) = recorder();
        let name = stage.name().to_string();

        // Pause so we can stack the queue deterministically, with
        // interruptions enabled by a start frame.
        stage.queue(Frame::start(StartSettings {
            allow_interruptions: true,
            ..Default::default()
        }));
        stage.queue(Frame::new(FramePayload::PauseProcessor(
            crate::frames::StageRef::Name(name.clone()),
        )));
        stage.start();
        assert!(wait_until(|| stage.is_paused(), 1000).await);

        stage.queue(Frame::text("a"));
        stage.queue(Frame::text("b"));
        assert!(wait_until(|| stage.metrics_snapshot().ordinary_depth == 2, 1000).await);

        // The interruption is a system frame: it runs while paused and wipes
        // a and b. A frame queued afterwards survives.
        stage.queue(Frame::interruption());
        assert!(wait_until(|| stage.metrics_snapshot().ordinary_depth == 0, 1000).await);

        stage.queue(Frame::text("c"));
        stage.queue(Frame::new(FramePayload::ResumeProcessor(
            crate::frames::StageRef::Name(name),
        )));

        assert!(wait_until(|| seen.lock().unwrap().len() == 1, 1000).await);
        match seen.lock().unwrap()[0].payload() {
            FramePayload::Text(t) => assert_eq!(t.text, "c"),
            other => panic!("expected TextFrame, got {}", other.name()),
        }

        stage.stop().await;
    }

    #[tokio::test]
    async fn push_without_neighbor_drops_silently() {
        let (mut stage, seen) = recorder();
        stage.start();
        stage.queue(Frame::text("nowhere to go"));
        assert!(wait_until(|| seen.lock().unwrap().len() == 1, 1000).await);
        stage.stop().await;
        assert_eq!(stage.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut stage = Processor::with_defaults(Passthrough);
        stage.start();
        stage.stop().await;
        stage.stop().await;
        assert_eq!(stage.state(), ProcessorState::Stopped);
    }
}

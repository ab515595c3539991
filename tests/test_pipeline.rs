// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Pipeline-level composition and lifecycle behavior.

mod common;

use common::{collecting_callback, frame_names, wait_until};
use voxflow::prelude::*;

#[tokio::test]
async fn queued_frames_traverse_the_whole_chain_in_order() {
    let (callback, seen) = collecting_callback();
    let stages = vec![
        Processor::with_defaults(Passthrough),
        Processor::with_defaults(Passthrough),
        Processor::with_defaults(Passthrough),
    ];
    let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None);
    pipeline.start().await.expect("start");

    for i in 0..10 {
        pipeline.queue(Frame::text(format!("message {i}")));
    }

    assert!(wait_until(|| seen.lock().unwrap().len() == 10, 2000).await);
    let texts: Vec<String> = seen
        .lock()
        .unwrap()
        .iter()
        .filter_map(|f| match f.payload() {
            FramePayload::Text(t) => Some(t.text.clone()),
            _ => None,
        })
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("message {i}")).collect();
    assert_eq!(texts, expected);

    pipeline.stop().await;
}

#[tokio::test]
async fn metrics_frames_surface_at_the_sink() {
    let (callback, seen) = collecting_callback();
    let stages = vec![Processor::with_defaults(Passthrough)];
    let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None);
    pipeline.start().await.expect("start");

    let reports = pipeline.metrics();
    assert_eq!(reports.len(), 3);
    pipeline.queue(Frame::new(FramePayload::Metrics(reports)));

    assert!(wait_until(|| seen.lock().unwrap().len() == 1, 2000).await);
    match seen.lock().unwrap()[0].payload() {
        FramePayload::Metrics(reports) => assert_eq!(reports.len(), 3),
        other => panic!("expected MetricsFrame, got {}", other.name()),
    }

    pipeline.stop().await;
}

#[tokio::test]
async fn start_frame_arms_interruptions_for_every_stage() {
    let (callback, seen) = collecting_callback();
    let stages = vec![Processor::with_defaults(Passthrough)];
    let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None)
        .with_params(PipelineParams {
            allow_interruptions: true,
            ..Default::default()
        });
    pipeline.start().await.expect("start");

    // Let the start frame traverse, then stack content behind a cancel.
    assert!(
        wait_until(
            || pipeline.metrics().iter().all(|m| m.handled_system >= 1),
            2000
        )
        .await
    );

    pipeline.queue(Frame::text("obsolete"));
    pipeline.queue(Frame::cancel(Some("user hung up".into())));

    // The cancel traverses every stage; whatever content it catches in a
    // queue is dropped, and the pipeline remains usable afterwards.
    assert!(
        wait_until(
            || pipeline.metrics().iter().all(|m| m.handled_system >= 2),
            2000
        )
        .await
    );

    pipeline.queue(Frame::text("fresh"));
    assert!(
        wait_until(
            || {
                seen.lock()
                    .unwrap()
                    .iter()
                    .any(|f| matches!(f.payload(), FramePayload::Text(t) if t.text == "fresh"))
            },
            2000
        )
        .await
    );

    pipeline.stop().await;
}

#[tokio::test]
async fn stopped_pipeline_reports_not_running() {
    let mut pipeline = Pipeline::new(vec![Processor::with_defaults(Passthrough)]);
    pipeline.start().await.expect("start");
    assert!(pipeline.is_running());

    pipeline.stop().await;
    assert!(!pipeline.is_running());
    for processor in pipeline.processors() {
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }
}

#[tokio::test]
async fn end_frame_traverses_without_reaching_handlers() {
    let (callback, seen) = collecting_callback();
    let stages = vec![Processor::with_defaults(Passthrough)];
    let mut pipeline = Pipeline::with_callbacks(stages, Some(callback), None);
    pipeline.start().await.expect("start");

    pipeline.queue(Frame::end());
    pipeline.queue(Frame::text("after end"));

    // End is intercepted everywhere, so the callback only sees the text.
    assert!(wait_until(|| seen.lock().unwrap().len() == 1, 2000).await);
    assert_eq!(frame_names(&seen), vec!["TextFrame"]);

    pipeline.stop().await;
}

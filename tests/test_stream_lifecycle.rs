//! Open/close/end-of-stream transitions as seen through the capture engine.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::*;
use stream_capture::error::classify;
use stream_capture::{ImageFormat, PipelineMessage, Retryable, StateChange, StreamState};

#[test]
fn test_engine_starts_closed_and_opens_lazily() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    assert_eq!(engine.state(), StreamState::Closed);
    assert_eq!(pipeline.starts(), 0);

    pipeline.push(&gray_nv12(4, 4, 16), 4, 4);
    engine.capture(ImageFormat::Rgb8, LONG).unwrap();
    assert_eq!(engine.state(), StreamState::Streaming);
    assert_eq!(pipeline.starts(), 1);

    engine.open().unwrap();
    assert_eq!(pipeline.starts(), 1);
}

#[test]
fn test_refused_start_can_be_retried() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    pipeline.set_start(StateChange::Failed("missing decoder".into()));

    let err = engine.capture(ImageFormat::Rgb8, LONG).unwrap_err();
    assert_eq!(err.category(), "pipeline_state");
    assert!(err.is_retryable());
    assert!(classify::is_transient(&err));
    assert_eq!(engine.state(), StreamState::Closed);

    pipeline.set_start(StateChange::Success);
    engine.open().unwrap();
    assert_eq!(engine.state(), StreamState::Streaming);
    assert_eq!(pipeline.starts(), 2);
}

#[test]
fn test_bus_error_during_start_fails_open() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    pipeline.set_start(StateChange::Pending);
    pipeline.queue(PipelineMessage::Warning {
        origin: Some("parser".into()),
        message: "late buffer".into(),
    });
    pipeline.queue(PipelineMessage::Error {
        origin: Some("decoder".into()),
        message: "not negotiated".into(),
        debug: Some("caps mismatch".into()),
    });

    let err = engine.open().unwrap_err();
    assert!(err.to_string().contains("not negotiated"));
    assert!(!engine.is_streaming());
}

#[test]
fn test_pending_start_settles_without_confirmation() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    pipeline.set_start(StateChange::Pending);

    let started = Instant::now();
    engine.open().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(engine.is_streaming());
}

#[test]
fn test_close_is_idempotent() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    engine.close();
    assert_eq!(pipeline.stops(), 0);

    engine.open().unwrap();
    pipeline.queue(PipelineMessage::StateChanged { active: false });
    engine.close();
    engine.close();
    assert_eq!(pipeline.stops(), 1);
    assert_eq!(engine.state(), StreamState::Closed);
}

#[test]
fn test_refused_stop_still_closes() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    pipeline.set_stop(StateChange::Failed("busy".into()));
    engine.open().unwrap();
    engine.close();
    assert_eq!(engine.state(), StreamState::Closed);
}

#[test]
fn test_close_discards_pending_wakeup() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    engine.open().unwrap();
    pipeline.push(&gray_nv12(4, 4, 16), 4, 4);
    engine.close();

    // Reopening resumes from the next frame, the stale signal is gone.
    let err = engine.capture(ImageFormat::Rgb8, SHORT).unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn test_end_of_stream_wakes_blocked_capture() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    engine.open().unwrap();

    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        pipeline.end_of_stream();
        pipeline
    });

    let started = Instant::now();
    let err = engine.capture(ImageFormat::Rgba8, LONG).unwrap_err();
    assert!(err.is_stream_ended());
    assert!(started.elapsed() < Duration::from_secs(2));

    let pipeline = producer.join().unwrap();
    for _ in 0..3 {
        assert!(engine.open().unwrap_err().is_stream_ended());
    }
    assert_eq!(engine.state(), StreamState::EndOfStream);
    assert!(classify::is_fatal(&engine.open().unwrap_err()));

    // Close after end-of-stream still stops the pipeline, once.
    engine.close();
    engine.close();
    assert_eq!(pipeline.stops(), 1);
}

#[test]
fn test_end_of_stream_message_while_opening() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    pipeline.set_start(StateChange::Pending);
    pipeline.queue(PipelineMessage::EndOfStream);

    assert!(engine.open().unwrap_err().is_stream_ended());
    assert_eq!(engine.state(), StreamState::EndOfStream);
}

#[test]
fn test_capture_drains_status_messages() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    engine.open().unwrap();
    for i in 0..1000 {
        pipeline.queue(PipelineMessage::Info {
            origin: Some("qos".into()),
            message: format!("buffer {i} late"),
        });
    }
    pipeline.push(&gray_nv12(4, 4, 16), 4, 4);

    engine.capture(ImageFormat::Rgb8, LONG).unwrap();
    assert_eq!(pipeline.pending_messages(), 0);
    assert!(engine.is_streaming());
}

#[test]
fn test_error_while_streaming_fails_capture_and_closes() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    engine.open().unwrap();
    pipeline.push(&gray_nv12(4, 4, 32), 4, 4);
    engine.capture(ImageFormat::Rgb8, LONG).unwrap();

    pipeline.queue(PipelineMessage::Error {
        origin: Some("decoder".into()),
        message: "decode error".into(),
        debug: Some("corrupt slice header".into()),
    });
    pipeline.push(&gray_nv12(4, 4, 48), 4, 4);

    let err = engine.capture(ImageFormat::Rgb8, LONG).unwrap_err();
    assert_eq!(err.category(), "pipeline_state");
    assert!(err.to_string().contains("decode error"));
    assert_eq!(engine.state(), StreamState::Closed);
    assert_eq!(pipeline.stops(), 1);

    // The next capture reopens the pipeline.
    assert!(engine.capture(ImageFormat::Rgb8, SHORT).unwrap_err().is_timeout());
    assert_eq!(pipeline.starts(), 2);
}

#[test]
fn test_error_raised_during_wait_is_reported() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    engine.open().unwrap();

    let producer = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pipeline.queue(PipelineMessage::Error {
                origin: None,
                message: "source lost".into(),
                debug: None,
            });
        })
    };

    let err = engine
        .capture(ImageFormat::Rgb8, Duration::from_millis(200))
        .unwrap_err();
    producer.join().unwrap();
    assert!(err.to_string().contains("source lost"));
    assert!(!engine.is_streaming());
}

#[test]
fn test_end_of_stream_message_ends_capture_without_waiting() {
    let (mut engine, pipeline) = manual_engine(fast_config(4));
    engine.open().unwrap();
    pipeline.queue(PipelineMessage::EndOfStream);

    let started = Instant::now();
    let err = engine.capture(ImageFormat::Rgb8, LONG).unwrap_err();
    assert!(err.is_stream_ended());
    assert!(started.elapsed() < Duration::from_secs(1));
}

//! Common test utilities and helpers for the stream_capture tests
//!
//! Provides a hand-driven decode pipeline and NV12 frame builders so the
//! engine can be exercised without a media stack.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stream_capture::config::DecoderConfig;
use stream_capture::engine::{CaptureEngine, FrameSink, RawSample};
use stream_capture::pipeline::{DecodePipeline, PipelineMessage, StateChange};
use stream_capture::ImageFormat;

/// Everything the mock pipeline records or replays.
pub struct MockState {
    pub sink: Option<FrameSink>,
    pub start: StateChange,
    pub stop: StateChange,
    pub messages: VecDeque<PipelineMessage>,
    pub starts: usize,
    pub stops: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            sink: None,
            start: StateChange::Success,
            stop: StateChange::Success,
            messages: VecDeque::new(),
            starts: 0,
            stops: 0,
        }
    }
}

/// Decode pipeline whose frames are pushed by the test.
pub struct ManualPipeline {
    state: Arc<Mutex<MockState>>,
}

impl DecodePipeline for ManualPipeline {
    fn attach(&mut self, sink: FrameSink) {
        self.state.lock().sink = Some(sink);
    }

    fn request_active(&mut self) -> StateChange {
        let mut state = self.state.lock();
        state.starts += 1;
        state.start.clone()
    }

    fn request_inactive(&mut self) -> StateChange {
        let mut state = self.state.lock();
        state.stops += 1;
        state.stop.clone()
    }

    fn poll_message(&mut self) -> Option<PipelineMessage> {
        self.state.lock().messages.pop_front()
    }
}

/// Test-side handle onto a [`ManualPipeline`].
#[derive(Clone)]
pub struct PipelineHandle {
    state: Arc<Mutex<MockState>>,
}

impl PipelineHandle {
    pub fn sink(&self) -> FrameSink {
        self.state
            .lock()
            .sink
            .clone()
            .expect("pipeline not attached to an engine")
    }

    pub fn push(&self, data: &[u8], width: u32, height: u32) -> bool {
        self.sink().on_frame(RawSample::nv12(data, width, height))
    }

    pub fn push_format(&self, data: &[u8], width: u32, height: u32, format: ImageFormat) -> bool {
        self.sink().on_frame(RawSample {
            data,
            width,
            height,
            format,
        })
    }

    pub fn end_of_stream(&self) {
        self.sink().on_end_of_stream();
    }

    pub fn queue(&self, message: PipelineMessage) {
        self.state.lock().messages.push_back(message);
    }

    pub fn pending_messages(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn set_start(&self, change: StateChange) {
        self.state.lock().start = change;
    }

    pub fn set_stop(&self, change: StateChange) {
        self.state.lock().stop = change;
    }

    pub fn starts(&self) -> usize {
        self.state.lock().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }
}

pub fn manual_pipeline() -> (ManualPipeline, PipelineHandle) {
    let state = Arc::new(Mutex::new(MockState::default()));
    (
        ManualPipeline {
            state: Arc::clone(&state),
        },
        PipelineHandle { state },
    )
}

/// Heap-backed output and short settle times.
pub fn fast_config(num_buffers: usize) -> DecoderConfig {
    DecoderConfig {
        num_buffers,
        zero_copy: false,
        open_settle_ms: 50,
        close_settle_ms: 50,
        poll_interval_ms: 5,
    }
}

/// An engine over a manual pipeline with the CPU converter.
pub fn manual_engine(config: DecoderConfig) -> (CaptureEngine, PipelineHandle) {
    let (pipeline, handle) = manual_pipeline();
    let engine = CaptureEngine::with_cpu_converter(Box::new(pipeline), config)
        .expect("valid test config");
    (engine, handle)
}

/// A uniform NV12 frame.
pub fn nv12_frame(width: u32, height: u32, y: u8, u: u8, v: u8) -> Vec<u8> {
    let luma = (width * height) as usize;
    let pairs = (width.div_ceil(2) * height.div_ceil(2)) as usize;
    let mut frame = vec![y; luma];
    for _ in 0..pairs {
        frame.extend_from_slice(&[u, v]);
    }
    frame
}

/// A uniform NV12 frame with neutral chroma, so every RGB channel equals
/// the limited-range luma expansion of `y`.
pub fn gray_nv12(width: u32, height: u32, y: u8) -> Vec<u8> {
    nv12_frame(width, height, y, 128, 128)
}

pub const SHORT: Duration = Duration::from_millis(50);
pub const LONG: Duration = Duration::from_secs(5);

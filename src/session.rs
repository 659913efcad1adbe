//! # Capture Session
//!
//! Async access to a [`CaptureEngine`] for tokio applications.
//!
//! ## Architecture
//!
//! 1. **FrameSource Trait**: abstract interface for async frame sources
//! 2. **EngineSource**: runs blocking captures on tokio's blocking pool
//! 3. **Frame**: an owned copy of one converted frame
//!
//! `capture` blocks for up to its timeout, so it never runs on a runtime
//! worker thread. Frames are copied out of the output ring before crossing
//! back to async code, which keeps the ring's slots free for the next capture.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cap_color::ImageFormat;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::engine::{CaptureEngine, EngineStats};
use crate::error::{CaptureError, CaptureResult};

/// One converted frame, detached from the engine's ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub sequence: u64,
}

/// Abstract interface for async frame sources.
#[async_trait]
pub trait FrameSource: Send {
    /// Waits for the next frame.
    async fn next_frame(&mut self) -> CaptureResult<Frame>;

    /// Starts the underlying stream.
    async fn initialize(&mut self) -> CaptureResult<()>;

    /// Stops the underlying stream.
    async fn shutdown(&mut self) -> CaptureResult<()>;
}

/// [`FrameSource`] backed by a [`CaptureEngine`].
#[derive(Clone)]
pub struct EngineSource {
    engine: Arc<Mutex<CaptureEngine>>,
    format: ImageFormat,
    timeout: Duration,
}

impl EngineSource {
    pub fn new(engine: CaptureEngine, format: ImageFormat, timeout: Duration) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            format,
            timeout,
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.lock().stats()
    }

    async fn blocking<T, F>(&self, f: F) -> CaptureResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut CaptureEngine) -> CaptureResult<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || f(&mut engine.lock())).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(CaptureError::task_aborted("capture", e.to_string())),
        }
    }
}

#[async_trait]
impl FrameSource for EngineSource {
    async fn next_frame(&mut self) -> CaptureResult<Frame> {
        let (format, timeout) = (self.format, self.timeout);
        self.blocking(move |engine| {
            let slot = engine.capture(format, timeout)?;
            Ok(Frame {
                data: Arc::new(slot.to_vec()),
                width: slot.width(),
                height: slot.height(),
                format: slot.format(),
                sequence: slot.sequence(),
            })
        })
        .await
    }

    async fn initialize(&mut self) -> CaptureResult<()> {
        info!(format = %self.format, "starting engine source");
        self.blocking(|engine| engine.open()).await
    }

    async fn shutdown(&mut self) -> CaptureResult<()> {
        debug!("stopping engine source");
        self.blocking(|engine| {
            engine.close();
            Ok(())
        })
        .await
    }
}

/// Pulls up to `count` frames from `source`, skipping timeouts, until the
/// stream ends. Returns the frames collected.
pub async fn collect_frames<S: FrameSource + ?Sized>(
    source: &mut S,
    count: usize,
    max_timeouts: usize,
) -> CaptureResult<Vec<Frame>> {
    let mut frames = Vec::with_capacity(count);
    let mut timeouts = 0;
    while frames.len() < count {
        match source.next_frame().await {
            Ok(frame) => frames.push(frame),
            Err(e) if e.is_timeout() && timeouts < max_timeouts => {
                timeouts += 1;
                debug!(timeouts, "no frame yet");
            }
            Err(e) if e.is_stream_ended() => break,
            Err(e) => return Err(e),
        }
    }
    Ok(frames)
}

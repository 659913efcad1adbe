//! Synthetic decode pipeline producing moving NV12 gradients.
//!
//! Runs its own producer thread so the capture engine sees the same
//! callback-driven delivery it gets from a real decoder, without a media stack.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cap_color::ImageFormat;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::{DecodePipeline, PipelineMessage, StateChange};
use crate::engine::{FrameSink, RawSample};

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Generates `width` x `height` NV12 frames at `fps` until stopped, or until
/// `limit` frames have been produced, after which it reports end-of-stream.
pub struct TestPattern {
    width: u32,
    height: u32,
    fps: u32,
    limit: Option<u64>,
    sink: Option<FrameSink>,
    worker: Option<Worker>,
    produced: Arc<AtomicU64>,
    messages_tx: Sender<PipelineMessage>,
    messages_rx: Receiver<PipelineMessage>,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        let (messages_tx, messages_rx) = crossbeam_channel::unbounded();
        Self {
            width,
            height,
            fps: 30,
            limit: None,
            sink: None,
            worker: None,
            produced: Arc::new(AtomicU64::new(0)),
            messages_tx,
            messages_rx,
        }
    }

    /// Frames per second, at least 1.
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// End the stream after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Frames handed to the sink so far, across restarts.
    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Renders frame `index` of the pattern.
    ///
    /// Luma is a diagonal ramp shifted by `index`; chroma is a fixed
    /// horizontal/vertical ramp.
    pub fn render(width: u32, height: u32, index: u64) -> Vec<u8> {
        let mut frame = vec![0u8; ImageFormat::Nv12.size(width, height).unwrap_or(0)];
        Self::render_into(&mut frame, width, height, index);
        frame
    }

    fn render_into(frame: &mut [u8], width: u32, height: u32, index: u64) {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 {
            return;
        }
        let shift = (index % 256) as usize * 4;
        let (luma, chroma) = frame.split_at_mut(w * h);
        for (row, line) in luma.chunks_exact_mut(w).enumerate() {
            for (col, px) in line.iter_mut().enumerate() {
                *px = ((row + col + shift) % 256) as u8;
            }
        }
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let span = |n: usize| n.saturating_sub(1).max(1);
        for (row, line) in chroma.chunks_exact_mut(cw * 2).enumerate() {
            for (col, pair) in line.chunks_exact_mut(2).enumerate() {
                pair[0] = (col * 255 / span(cw)) as u8;
                pair[1] = (row * 255 / span(ch)) as u8;
            }
        }
    }

    fn spawn(&mut self, sink: FrameSink) -> std::io::Result<Worker> {
        let (stop, stopped) = crossbeam_channel::bounded::<()>(1);
        let messages = self.messages_tx.clone();
        let produced = Arc::clone(&self.produced);
        let (width, height, limit) = (self.width, self.height, self.limit);
        let interval = Duration::from_secs(1) / self.fps;

        let handle = thread::Builder::new()
            .name("test-pattern".into())
            .spawn(move || {
                let _ = messages.send(PipelineMessage::StateChanged { active: true });
                let mut frame = vec![0u8; ImageFormat::Nv12.size(width, height).unwrap_or(0)];
                loop {
                    let index = produced.load(Ordering::Relaxed);
                    if limit.is_some_and(|limit| index >= limit) {
                        info!(frames = index, "test pattern exhausted");
                        sink.on_end_of_stream();
                        let _ = messages.send(PipelineMessage::EndOfStream);
                        break;
                    }
                    Self::render_into(&mut frame, width, height, index);
                    sink.on_frame(RawSample::nv12(&frame, width, height));
                    produced.fetch_add(1, Ordering::Relaxed);

                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("test pattern thread exiting");
            })?;
        Ok(Worker { stop, handle })
    }
}

impl DecodePipeline for TestPattern {
    fn attach(&mut self, sink: FrameSink) {
        self.sink = Some(sink);
    }

    fn request_active(&mut self) -> StateChange {
        if self.worker.is_some() {
            return StateChange::Success;
        }
        if self.width == 0 || self.height == 0 {
            return StateChange::Failed(format!(
                "invalid pattern size {}x{}",
                self.width, self.height
            ));
        }
        let Some(sink) = self.sink.clone() else {
            return StateChange::Failed("no frame sink attached".into());
        };
        match self.spawn(sink) {
            Ok(worker) => {
                self.worker = Some(worker);
                StateChange::Pending
            }
            Err(e) => StateChange::Failed(format!("failed to start pattern thread: {e}")),
        }
    }

    fn request_inactive(&mut self) -> StateChange {
        let Some(Worker { stop, handle }) = self.worker.take() else {
            return StateChange::Success;
        };
        let _ = stop.try_send(());
        drop(stop);
        if handle.join().is_err() {
            warn!("test pattern thread panicked");
            return StateChange::Failed("pattern thread panicked".into());
        }
        let _ = self
            .messages_tx
            .send(PipelineMessage::StateChanged { active: false });
        StateChange::Success
    }

    fn poll_message(&mut self) -> Option<PipelineMessage> {
        self.messages_rx.try_recv().ok()
    }
}

impl Drop for TestPattern {
    fn drop(&mut self) {
        self.request_inactive();
    }
}

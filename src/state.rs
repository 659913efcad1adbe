//! # Stream Lifecycle
//!
//! Tracks whether the decode pipeline is closed, streaming, or has reached
//! end-of-stream, and performs the open/close transitions against a
//! [`DecodePipeline`].
//!
//! ```text
//!            open()                 end_of_stream()
//!  Closed ───────────▶ Streaming ───────────────────▶ EndOfStream
//!    ▲                    │                               │
//!    └────── close() ─────┘        close() tears the pipeline down once,
//!                                  the state stays EndOfStream
//! ```
//!
//! The state is derived from two flags, `streaming` and `eos`, so a close after
//! end-of-stream still releases the pipeline.

use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::DecoderConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::{DecodePipeline, PipelineMessage, StateChange};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Streaming,
    EndOfStream,
}

/// Raw lifecycle flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub streaming: bool,
    pub eos: bool,
}

impl StreamStatus {
    pub fn state(&self) -> StreamState {
        if self.eos {
            StreamState::EndOfStream
        } else if self.streaming {
            StreamState::Streaming
        } else {
            StreamState::Closed
        }
    }
}

#[derive(Debug, Default)]
struct Flags {
    status: StreamStatus,
    /// Set once the pipeline has been told to stop after end-of-stream.
    released: bool,
}

/// What a drained message means for the transition in progress.
enum Drained {
    Confirmed,
    Failed(String),
    Ended,
}

/// Lifecycle flags shared between the capture thread and the pipeline's
/// end-of-stream callback.
#[derive(Debug)]
pub struct StreamControl {
    flags: Mutex<Flags>,
    open_settle: Duration,
    close_settle: Duration,
    poll_interval: Duration,
}

impl StreamControl {
    pub fn new(open_settle: Duration, close_settle: Duration, poll_interval: Duration) -> Self {
        Self {
            flags: Mutex::new(Flags::default()),
            open_settle,
            close_settle,
            poll_interval,
        }
    }

    pub fn from_config(config: &DecoderConfig) -> Self {
        Self::new(
            config.open_settle(),
            config.close_settle(),
            config.poll_interval(),
        )
    }

    pub fn state(&self) -> StreamState {
        self.flags.lock().status.state()
    }

    pub fn status(&self) -> StreamStatus {
        self.flags.lock().status
    }

    pub fn is_streaming(&self) -> bool {
        self.flags.lock().status.streaming
    }

    pub fn is_eos(&self) -> bool {
        self.flags.lock().status.eos
    }

    /// Starts the pipeline unless it is already streaming.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::StreamEnded`] once end-of-stream has been reached,
    ///   including when it arrives while opening.
    /// - [`CaptureError::PipelineState`] if the pipeline refuses to start or
    ///   reports an error while starting.
    pub fn open(&self, pipeline: &mut dyn DecodePipeline) -> CaptureResult<()> {
        {
            let flags = self.flags.lock();
            if flags.status.eos {
                return Err(CaptureError::stream_ended().with_operation("open"));
            }
            if flags.status.streaming {
                return Ok(());
            }
        }

        info!("opening decode pipeline");
        let settled = match pipeline.request_active() {
            StateChange::Failed(reason) => {
                error!(%reason, "pipeline refused to start");
                return Err(CaptureError::pipeline_state("active", reason));
            }
            StateChange::Success => self.drain(pipeline, true, None),
            StateChange::Pending => {
                debug!(settle_ms = self.open_settle.as_millis() as u64, "pipeline start is asynchronous");
                self.drain(pipeline, true, Some(Instant::now() + self.open_settle))
            }
        };
        match settled {
            Some(Drained::Failed(reason)) => {
                return Err(CaptureError::pipeline_state("active", reason));
            }
            Some(Drained::Ended) => {
                return Err(CaptureError::stream_ended().with_operation("open"));
            }
            Some(Drained::Confirmed) | None => {}
        }

        let mut flags = self.flags.lock();
        if flags.status.eos {
            return Err(CaptureError::stream_ended().with_operation("open"));
        }
        flags.status.streaming = true;
        flags.released = false;
        info!("decode pipeline streaming");
        Ok(())
    }

    /// Stops the pipeline. Never fails.
    ///
    /// A no-op when closed. After end-of-stream the pipeline is stopped once
    /// and later calls do nothing.
    pub fn close(&self, pipeline: &mut dyn DecodePipeline) {
        {
            let flags = self.flags.lock();
            let status = flags.status;
            if !status.streaming && (!status.eos || flags.released) {
                return;
            }
        }

        info!("closing decode pipeline");
        if let StateChange::Failed(reason) = pipeline.request_inactive() {
            warn!(%reason, "pipeline refused to stop");
        }
        match self.drain(pipeline, false, Some(Instant::now() + self.close_settle)) {
            Some(Drained::Failed(reason)) => warn!(%reason, "error while stopping pipeline"),
            Some(Drained::Confirmed) => debug!("pipeline stop confirmed"),
            Some(Drained::Ended) | None => {}
        }

        let mut flags = self.flags.lock();
        flags.status.streaming = false;
        flags.released = true;
        info!("decode pipeline closed");
    }

    /// Marks the stream as permanently ended.
    pub fn end_of_stream(&self) {
        let mut flags = self.flags.lock();
        if !flags.status.eos {
            info!("end of stream");
        }
        flags.status.eos = true;
        flags.status.streaming = false;
    }

    /// Reads the status messages queued while streaming, logging each one.
    ///
    /// End-of-stream marks the stream ended. State changes are only logged.
    ///
    /// # Errors
    ///
    /// [`CaptureError::PipelineState`] for the first error message; later
    /// messages stay queued.
    pub fn poll(&self, pipeline: &mut dyn DecodePipeline) -> CaptureResult<()> {
        while let Some(message) = pipeline.poll_message() {
            if let Some(Drained::Failed(reason)) = self.handle(message, None) {
                return Err(CaptureError::pipeline_state("streaming", reason)
                    .with_operation("poll"));
            }
        }
        Ok(())
    }

    /// Reads status messages until the transition to `active` is confirmed,
    /// an error or end-of-stream arrives, or `deadline` passes. Without a
    /// deadline only the messages already queued are read.
    fn drain(
        &self,
        pipeline: &mut dyn DecodePipeline,
        active: bool,
        deadline: Option<Instant>,
    ) -> Option<Drained> {
        loop {
            while let Some(message) = pipeline.poll_message() {
                match self.handle(message, Some(active)) {
                    Some(Drained::Ended) if !active => {}
                    Some(outcome) => return Some(outcome),
                    None => {}
                }
            }

            let deadline = deadline?;
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Logs one message and reports what it means for a transition towards
    /// `target`. End-of-stream is recorded here.
    fn handle(&self, message: PipelineMessage, target: Option<bool>) -> Option<Drained> {
        match message {
            PipelineMessage::Error {
                origin,
                message,
                debug: details,
            } => {
                error!(
                    origin = origin.as_deref().unwrap_or("pipeline"),
                    details = details.as_deref().unwrap_or(""),
                    "{message}"
                );
                Some(Drained::Failed(message))
            }
            PipelineMessage::Warning { origin, message } => {
                warn!(origin = origin.as_deref().unwrap_or("pipeline"), "{message}");
                None
            }
            PipelineMessage::Info { origin, message } => {
                info!(origin = origin.as_deref().unwrap_or("pipeline"), "{message}");
                None
            }
            PipelineMessage::StateChanged { active } => {
                debug!(active, "pipeline state changed");
                (target == Some(active)).then_some(Drained::Confirmed)
            }
            PipelineMessage::EndOfStream => {
                self.end_of_stream();
                Some(Drained::Ended)
            }
        }
    }
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::from_config(&DecoderConfig::default())
    }
}

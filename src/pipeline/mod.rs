//! # Decode Pipelines
//!
//! The capture engine does not know which demuxer, parser or decoder produces
//! its frames. It drives anything that implements [`DecodePipeline`]:
//!
//! - the pipeline pushes decoded samples into the [`FrameSink`] it was attached
//!   to, from its own thread;
//! - the engine asks it to become active or inactive and reads its status
//!   messages while doing so.
//!
//! ## Implementations
//!
//! - [`TestPattern`]: synthetic NV12 frames from a background thread
//! - [`gst::GstPipeline`]: a GStreamer launch description ending in an appsink
//!   (feature `gst-pipeline`)

#[cfg(feature = "gst-pipeline")]
pub mod gst;
pub mod test_pattern;

pub use test_pattern::TestPattern;

use crate::engine::FrameSink;

/// Outcome of a state change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// The transition completed.
    Success,
    /// The transition continues asynchronously; watch `poll_message`.
    Pending,
    /// The pipeline refused the transition.
    Failed(String),
}

/// Status messages a pipeline reports while running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineMessage {
    Error {
        origin: Option<String>,
        message: String,
        debug: Option<String>,
    },
    Warning {
        origin: Option<String>,
        message: String,
    },
    Info {
        origin: Option<String>,
        message: String,
    },
    /// The pipeline as a whole finished a transition.
    StateChanged { active: bool },
    EndOfStream,
}

/// A source of decoded frames the capture engine can start and stop.
pub trait DecodePipeline: Send {
    /// Hands the pipeline the producer handle it must deliver frames to.
    ///
    /// Called once by the engine before any state change. The pipeline calls
    /// [`FrameSink::on_frame`] per decoded sample and
    /// [`FrameSink::on_end_of_stream`] once when exhausted.
    fn attach(&mut self, sink: FrameSink);

    fn request_active(&mut self) -> StateChange;

    fn request_inactive(&mut self) -> StateChange;

    /// Next pending status message, without blocking.
    fn poll_message(&mut self) -> Option<PipelineMessage>;
}

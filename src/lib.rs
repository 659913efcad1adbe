//! # Stream Capture Library
//!
//! Turns a continuous, callback-driven stream of decoded video frames into
//! discrete, on-demand, format-converted frames for a single consumer.
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//! - `core`: the frame slot ring and the wake signal shared by producer and consumer
//! - `state`: stream lifecycle (closed, streaming, end-of-stream)
//! - `engine`: the capture engine and the frame sink pipelines deliver into
//! - `pipeline`: the decode pipeline interface and its implementations
//! - `config`: engine configuration and validation
//! - `session`: async frame sources on top of the engine
//! - `error`: typed errors with retry and recovery classification
//!
//! Pixel formats and conversion live in the `cap-color` crate.
//!
//! ## Features
//!
//! - **Latest-frame delivery**: slow consumers skip stale frames, never block the decoder
//! - **Zero-copy slots**: ring slots can be file-backed shared mappings
//! - **Pluggable pipelines**: synthetic test pattern, or GStreamer with `gst-pipeline`
//! - **Async/await**: a tokio-friendly frame source
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use stream_capture::config::DecoderConfig;
//! use stream_capture::engine::CaptureEngine;
//! use stream_capture::pipeline::TestPattern;
//! use stream_capture::ImageFormat;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pattern = TestPattern::new(1280, 720).with_fps(30);
//! let mut engine = CaptureEngine::with_cpu_converter(Box::new(pattern), DecoderConfig::default())?;
//!
//! let frame = engine.capture(ImageFormat::Rgba8, Duration::from_secs(1))?;
//! assert_eq!(frame.len(), 1280 * 720 * 4);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod state;

/// Re-export error types for convenience
pub use error::{
    CaptureError, CaptureResult, HasRecoverySuggestion, HasSeverity, Recoverable, Retryable,
};

/// Re-export commonly used types
pub use cap_color::{ColorConverter, ConvertError, CpuConverter, ImageFormat};
pub use engine::{CaptureEngine, EngineStats, FrameSink, RawSample};
pub use pipeline::{DecodePipeline, PipelineMessage, StateChange};
pub use state::StreamState;

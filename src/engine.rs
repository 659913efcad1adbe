//! # Capture Engine
//!
//! Turns the asynchronous stream of decoded frames a [`DecodePipeline`]
//! produces into on-demand, format-converted frames for one consumer.
//!
//! ## Data Flow
//!
//! ```text
//! pipeline thread                          caller thread
//! ───────────────                          ─────────────
//! FrameSink::on_frame                      CaptureEngine::capture
//!   ├─ validate sample                       ├─ open() if not streaming
//!   ├─ raw ring: peek_write + copy           ├─ WaitEvent::wait(timeout)
//!   ├─ commit                                ├─ raw ring: take_latest_once
//!   └─ WaitEvent::signal ──────────────────▶ ├─ output ring: allocate + peek_write
//!                                            ├─ ColorConverter::convert
//!                                            └─ commit, return SlotRef
//! ```
//!
//! The raw ring, the wake flag and the lifecycle flags are the only state the
//! two threads share. The producer side never waits on the consumer: slot
//! locks are only tried, and a frame with no free slot is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use cap_color::{ColorConverter, ConvertError, CpuConverter, ImageFormat};
use tracing::{debug, error, trace, warn};

use crate::config::DecoderConfig;
use crate::core::{AllocMode, FrameInfo, RingBuffer, RingStats, SlotRef, WaitEvent};
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::DecodePipeline;
use crate::state::{StreamControl, StreamState};

/// One decoded sample as handed over by a pipeline callback.
#[derive(Debug, Clone, Copy)]
pub struct RawSample<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

impl<'a> RawSample<'a> {
    /// An NV12 sample, the layout decoders deliver by default.
    pub fn nv12(data: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            format: ImageFormat::Nv12,
        }
    }
}

/// Frame counters and ring usage for one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Samples committed into the raw ring.
    pub frames_received: u64,
    /// Samples discarded for bad geometry or short data.
    pub frames_malformed: u64,
    /// Samples dropped because no raw slot could be used.
    pub frames_dropped: u64,
    /// Frames returned by `capture`.
    pub frames_captured: u64,
    pub raw: RingStats,
    pub output: RingStats,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
    captured: AtomicU64,
}

/// State shared between the engine and its frame sink.
#[derive(Debug)]
struct Shared {
    raw: RingBuffer,
    wake: WaitEvent,
    control: StreamControl,
    width: AtomicU32,
    height: AtomicU32,
    counters: Counters,
    num_buffers: usize,
}

/// Producer handle a [`DecodePipeline`] delivers frames through.
///
/// Cheap to clone. Safe to call from the pipeline's own threads while the
/// engine is capturing.
#[derive(Debug, Clone)]
pub struct FrameSink {
    shared: Arc<Shared>,
}

impl FrameSink {
    /// Copies a decoded sample into the raw ring and wakes the consumer.
    ///
    /// Returns `false` if the sample was malformed or no slot was free; the
    /// sample is then discarded.
    pub fn on_frame(&self, sample: RawSample<'_>) -> bool {
        let shared = &self.shared;
        let needed = sample.format.size(sample.width, sample.height);
        let valid = sample.width >= 1
            && sample.height >= 1
            && !sample.data.is_empty()
            && needed.is_some_and(|n| sample.data.len() >= n);
        if !valid {
            warn!(
                width = sample.width,
                height = sample.height,
                format = %sample.format,
                len = sample.data.len(),
                "discarding malformed frame"
            );
            shared.counters.malformed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if let Err(e) = shared
            .raw
            .allocate(shared.num_buffers, sample.data.len(), AllocMode::ZeroCopy)
        {
            error!(error = %e, "failed to allocate raw frame ring");
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let Some(mut slot) = shared.raw.peek_write() else {
            debug!("no free raw slot, dropping frame");
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let len = slot.write(sample.data);
        let info = FrameInfo::new(sample.width, sample.height, sample.format);
        if slot.commit(len, info).is_none() {
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        shared.width.store(sample.width, Ordering::Relaxed);
        shared.height.store(sample.height, Ordering::Relaxed);
        shared.counters.received.fetch_add(1, Ordering::Relaxed);
        shared.wake.signal();
        true
    }

    /// Marks the stream ended and wakes a blocked `capture`.
    pub fn on_end_of_stream(&self) {
        self.shared.control.end_of_stream();
        self.shared.wake.signal();
    }
}

/// Pulls decoded frames from a pipeline and converts them on request.
///
/// Dropping the engine closes the pipeline.
pub struct CaptureEngine {
    shared: Arc<Shared>,
    pipeline: Box<dyn DecodePipeline>,
    converter: Box<dyn ColorConverter>,
    output: RingBuffer,
    config: DecoderConfig,
}

impl CaptureEngine {
    /// Creates an engine and attaches its frame sink to `pipeline`.
    ///
    /// The pipeline is not started until [`open`](Self::open) or the first
    /// [`capture`](Self::capture).
    ///
    /// # Errors
    ///
    /// [`CaptureError::Config`] if `config` does not validate.
    pub fn new(
        mut pipeline: Box<dyn DecodePipeline>,
        converter: Box<dyn ColorConverter>,
        config: DecoderConfig,
    ) -> CaptureResult<Self> {
        config.check()?;
        let shared = Arc::new(Shared {
            raw: RingBuffer::new(),
            wake: WaitEvent::new(),
            control: StreamControl::from_config(&config),
            width: AtomicU32::new(0),
            height: AtomicU32::new(0),
            counters: Counters::default(),
            num_buffers: config.num_buffers,
        });
        pipeline.attach(FrameSink {
            shared: Arc::clone(&shared),
        });
        debug!(num_buffers = config.num_buffers, zero_copy = config.zero_copy, "capture engine created");
        Ok(Self {
            shared,
            pipeline,
            converter,
            output: RingBuffer::new(),
            config,
        })
    }

    /// Creates an engine converting on the CPU.
    pub fn with_cpu_converter(
        pipeline: Box<dyn DecodePipeline>,
        config: DecoderConfig,
    ) -> CaptureResult<Self> {
        Self::new(pipeline, Box::new(CpuConverter::new()), config)
    }

    /// Starts streaming. A no-op while already streaming.
    pub fn open(&mut self) -> CaptureResult<()> {
        self.shared.control.open(self.pipeline.as_mut())
    }

    /// Stops streaming. Never fails; safe to call repeatedly.
    pub fn close(&mut self) {
        self.shared.control.close(self.pipeline.as_mut());
        self.shared.wake.reset();
    }

    /// Waits up to `timeout` for a frame newer than the last one captured and
    /// returns it converted to `format`.
    ///
    /// The returned handle keeps its output slot from being reused until it
    /// is dropped.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::Timeout`] if no new frame arrived in time.
    /// - [`CaptureError::StreamEnded`] once end-of-stream has been reached.
    /// - [`CaptureError::UnsupportedFormat`] if the converter rejects `format`.
    /// - [`CaptureError::Allocation`] if the output slot cannot be sized, or
    ///   every output slot is still held by the caller.
    /// - [`CaptureError::PipelineState`] if the pipeline could not be started,
    ///   or reported an error while streaming. The stream is closed first.
    pub fn capture(&mut self, format: ImageFormat, timeout: Duration) -> CaptureResult<SlotRef> {
        if self.shared.control.is_streaming() {
            self.poll_pipeline()?;
        } else {
            self.open()?;
        }

        if !self.shared.wake.wait(timeout) {
            self.poll_pipeline()?;
            return Err(self.starved(timeout));
        }
        let Some(raw) = self.shared.raw.take_latest_once() else {
            self.poll_pipeline()?;
            return Err(self.starved(timeout));
        };

        let info = raw.info();
        let size = format.size(info.width, info.height).ok_or_else(|| {
            CaptureError::allocation(
                "output ring",
                format!("{}x{} {format} frame size overflows", info.width, info.height),
            )
        })?;
        self.output.allocate(
            self.config.num_buffers,
            size,
            AllocMode::from_zero_copy(self.config.zero_copy),
        )?;
        let mut slot = self.output.peek_write().ok_or_else(|| {
            CaptureError::allocation("output ring", "every output slot is held by the caller")
                .with_metadata("slots", self.config.num_buffers.to_string())
        })?;

        match self.converter.convert(
            &raw,
            info.format,
            slot.as_mut_slice(),
            format,
            info.width,
            info.height,
        ) {
            Ok(()) => {}
            Err(ConvertError::Unsupported { .. }) => {
                let supported = self.converter.supported_outputs(info.format);
                let names: Vec<&str> = supported.iter().map(|f| f.name()).collect();
                error!(
                    requested = %format,
                    input = %info.format,
                    supported = %names.join(", "),
                    "unsupported output format"
                );
                return Err(CaptureError::unsupported_format(format, info.format, supported));
            }
            Err(e) => {
                return Err(CaptureError::allocation("output ring", e.to_string())
                    .with_operation("convert"));
            }
        }
        drop(raw);

        slot.commit(size, FrameInfo::new(info.width, info.height, format))
            .and_then(|_| self.output.take_latest_once())
            .map(|frame| {
                self.shared.counters.captured.fetch_add(1, Ordering::Relaxed);
                trace!(sequence = frame.sequence(), %format, "frame captured");
                frame
            })
            .ok_or_else(|| CaptureError::allocation("output ring", "converted frame was lost"))
    }

    /// Drains the pipeline's status messages. A pipeline error closes the
    /// stream so the next capture reopens it; end-of-stream wakes the wait.
    fn poll_pipeline(&mut self) -> CaptureResult<()> {
        if let Err(e) = self.shared.control.poll(self.pipeline.as_mut()) {
            self.close();
            return Err(e);
        }
        if self.shared.control.is_eos() {
            self.shared.wake.signal();
        }
        Ok(())
    }

    fn starved(&self, timeout: Duration) -> CaptureError {
        if self.shared.control.is_eos() {
            CaptureError::stream_ended().with_operation("capture")
        } else {
            let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            CaptureError::timeout("capture", ms)
        }
    }

    /// Width of the last frame received, 0 before the first.
    pub fn width(&self) -> u32 {
        self.shared.width.load(Ordering::Relaxed)
    }

    /// Height of the last frame received, 0 before the first.
    pub fn height(&self) -> u32 {
        self.shared.height.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> StreamState {
        self.shared.control.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.control.is_streaming()
    }

    pub fn is_eos(&self) -> bool {
        self.shared.control.is_eos()
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        let counters = &self.shared.counters;
        EngineStats {
            frames_received: counters.received.load(Ordering::Relaxed),
            frames_malformed: counters.malformed.load(Ordering::Relaxed),
            frames_dropped: counters.dropped.load(Ordering::Relaxed),
            frames_captured: counters.captured.load(Ordering::Relaxed),
            raw: self.shared.raw.stats(),
            output: self.output.stats(),
        }
    }

    /// Another handle to the producer side, e.g. for a second callback thread.
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("state", &self.state())
            .field("width", &self.width())
            .field("height", &self.height())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

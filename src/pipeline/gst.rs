//! # GStreamer Decode Pipeline
//!
//! Drives a caller-supplied launch description whose last element is a named
//! `appsink`, e.g.
//!
//! ```text
//! filesrc location=clip.mp4 ! qtdemux ! h264parse ! avdec_h264 ! videoconvert
//!   ! video/x-raw,format=NV12 ! appsink name=sink
//! ```
//!
//! The description is not built here. Decoded samples are copied out of the
//! appsink callback into the engine's raw ring; preroll samples are pulled and
//! discarded so the appsink never holds a buffer across shutdown.

use cap_color::ImageFormat;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use super::{DecodePipeline, PipelineMessage, StateChange};
use crate::engine::{FrameSink, RawSample};
use crate::error::{CaptureError, CaptureResult};

/// Default appsink name looked up in the launch description.
pub const DEFAULT_SINK_NAME: &str = "sink";

pub struct GstPipeline {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    bus: gst::Bus,
}

impl GstPipeline {
    /// Parses `description` and finds the appsink named [`DEFAULT_SINK_NAME`].
    pub fn launch(description: &str) -> CaptureResult<Self> {
        Self::with_sink_name(description, DEFAULT_SINK_NAME)
    }

    /// Parses `description` and finds the appsink named `sink_name`.
    ///
    /// # Errors
    ///
    /// [`CaptureError::GStreamer`] if GStreamer cannot be initialised, the
    /// description does not parse into a pipeline, or it has no appsink with
    /// that name.
    pub fn with_sink_name(description: &str, sink_name: &str) -> CaptureResult<Self> {
        gst::init()?;
        debug!(%description, "parsing launch description");

        let pipeline = gst::parse::launch(description)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::gstreamer(None, "launch description is not a pipeline"))?;
        let appsink = pipeline
            .by_name(sink_name)
            .ok_or_else(|| {
                CaptureError::gstreamer(Some(sink_name.to_string()), "no element with this name")
            })?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::gstreamer(Some(sink_name.to_string()), "element is not an appsink"))?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| CaptureError::gstreamer(None, "pipeline has no bus"))?;

        Ok(Self {
            pipeline,
            appsink,
            bus,
        })
    }
}

/// Maps a negotiated raw video format onto ours.
fn image_format(format: gst_video::VideoFormat) -> Option<ImageFormat> {
    use gst_video::VideoFormat as F;
    Some(match format {
        F::Nv12 => ImageFormat::Nv12,
        F::I420 => ImageFormat::I420,
        F::Rgb => ImageFormat::Rgb8,
        F::Rgba | F::Rgbx => ImageFormat::Rgba8,
        F::Bgr => ImageFormat::Bgr8,
        F::Bgra | F::Bgrx => ImageFormat::Bgra8,
        F::Gray8 => ImageFormat::Gray8,
        _ => return None,
    })
}

/// Bytes per row and rows for each plane of a tightly packed frame.
fn planes(format: ImageFormat, width: usize, height: usize) -> Vec<(usize, usize)> {
    let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
    match format {
        ImageFormat::Nv12 => vec![(width, height), (cw * 2, ch)],
        ImageFormat::I420 => vec![(width, height), (cw, ch), (cw, ch)],
        packed => {
            let bpp = packed.channels().unwrap_or(1) * packed.bytes_per_channel();
            vec![(width * bpp, height)]
        }
    }
}

/// Whether a frame laid out with `strides` and `offsets` is already tightly
/// packed: every row is exactly as wide as its pixels and every plane starts
/// where the previous one ends.
fn is_packed(format: ImageFormat, width: usize, height: usize, strides: &[i32], offsets: &[usize]) -> bool {
    let mut expected_offset = 0;
    planes(format, width, height)
        .into_iter()
        .enumerate()
        .all(|(plane, (row_bytes, rows))| {
            let stride = strides.get(plane).and_then(|&s| usize::try_from(s).ok());
            let offset = offsets.get(plane).copied();
            let packed = stride == Some(row_bytes) && offset == Some(expected_offset);
            expected_offset += row_bytes * rows;
            packed
        })
}

/// Copies padded planes into a tightly packed buffer. `None` if the mapped
/// memory is shorter than the layout claims.
fn repack(
    data: &[u8],
    format: ImageFormat,
    width: usize,
    height: usize,
    strides: &[i32],
    offsets: &[usize],
) -> Option<Vec<u8>> {
    let mut packed = Vec::with_capacity(format.size(width as u32, height as u32)?);
    for (plane, (row_bytes, rows)) in planes(format, width, height).into_iter().enumerate() {
        let stride = usize::try_from(*strides.get(plane)?).ok()?;
        let offset = *offsets.get(plane)?;
        for row in 0..rows {
            let start = offset + row * stride;
            packed.extend_from_slice(data.get(start..start + row_bytes)?);
        }
    }
    Some(packed)
}

fn deliver(sink: &FrameSink, appsink: &gst_app::AppSink) -> Result<gst::FlowSuccess, gst::FlowError> {
    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
    let (Some(caps), Some(buffer)) = (sample.caps(), sample.buffer()) else {
        warn!("sample without caps or buffer");
        return Ok(gst::FlowSuccess::Ok);
    };
    let info = match gst_video::VideoInfo::from_caps(caps) {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "unreadable video caps");
            return Ok(gst::FlowSuccess::Ok);
        }
    };
    let Some(format) = image_format(info.format()) else {
        warn!(format = ?info.format(), "unsupported decoded format");
        return Ok(gst::FlowSuccess::Ok);
    };
    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
    let (width, height) = (info.width(), info.height());

    if is_packed(format, width as usize, height as usize, info.stride(), info.offset()) {
        sink.on_frame(RawSample {
            data: map.as_slice(),
            width,
            height,
            format,
        });
    } else {
        match repack(map.as_slice(), format, width as usize, height as usize, info.stride(), info.offset()) {
            Some(packed) => {
                sink.on_frame(RawSample {
                    data: &packed,
                    width,
                    height,
                    format,
                });
            }
            None => warn!(width, height, "buffer shorter than its video info"),
        }
    }
    Ok(gst::FlowSuccess::Ok)
}

impl DecodePipeline for GstPipeline {
    fn attach(&mut self, sink: FrameSink) {
        let eos_sink = sink.clone();
        self.appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| deliver(&sink, appsink))
                .new_preroll(|appsink| {
                    let _ = appsink.pull_preroll();
                    Ok(gst::FlowSuccess::Ok)
                })
                .eos(move |_| eos_sink.on_end_of_stream())
                .build(),
        );
    }

    fn request_active(&mut self) -> StateChange {
        match self.pipeline.set_state(gst::State::Playing) {
            Ok(gst::StateChangeSuccess::Async) => StateChange::Pending,
            Ok(_) => StateChange::Success,
            Err(e) => StateChange::Failed(e.to_string()),
        }
    }

    fn request_inactive(&mut self) -> StateChange {
        match self.pipeline.set_state(gst::State::Null) {
            Ok(gst::StateChangeSuccess::Async) => StateChange::Pending,
            Ok(_) => StateChange::Success,
            Err(e) => StateChange::Failed(e.to_string()),
        }
    }

    fn poll_message(&mut self) -> Option<PipelineMessage> {
        use gst::MessageView;

        while let Some(message) = self.bus.pop() {
            let origin = message.src().map(|s| s.path_string().to_string());
            let translated = match message.view() {
                MessageView::Error(err) => PipelineMessage::Error {
                    origin,
                    message: err.error().to_string(),
                    debug: err.debug().map(|d| d.to_string()),
                },
                MessageView::Warning(w) => PipelineMessage::Warning {
                    origin,
                    message: w.error().to_string(),
                },
                MessageView::Info(i) => PipelineMessage::Info {
                    origin,
                    message: i.error().to_string(),
                },
                MessageView::Eos(_) => PipelineMessage::EndOfStream,
                MessageView::StateChanged(change) => {
                    let from_pipeline = message
                        .src()
                        .is_some_and(|s| s == self.pipeline.upcast_ref::<gst::Object>());
                    if !from_pipeline {
                        continue;
                    }
                    debug!(old = ?change.old(), current = ?change.current(), "pipeline state changed");
                    match change.current() {
                        gst::State::Playing => PipelineMessage::StateChanged { active: true },
                        gst::State::Ready | gst::State::Null => {
                            PipelineMessage::StateChanged { active: false }
                        }
                        _ => continue,
                    }
                }
                _ => continue,
            };
            return Some(translated);
        }
        None
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        if self.pipeline.set_state(gst::State::Null).is_err() {
            warn!("failed to release GStreamer pipeline");
        } else {
            info!("GStreamer pipeline released");
        }
    }
}

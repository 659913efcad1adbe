use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use stream_capture::config::{DecoderConfig, parse_size, parse_timeout};
use stream_capture::engine::CaptureEngine;
use stream_capture::pipeline::{DecodePipeline, TestPattern};
use stream_capture::session::{EngineSource, Frame, FrameSource};
use stream_capture::ImageFormat;
use tracing_subscriber::EnvFilter;

/// Capture decoded video frames on demand:
/// - a synthetic test pattern (always available)
/// - a GStreamer launch description ending in `appsink name=sink` (feature `gst-pipeline`)
#[derive(Parser, Debug)]
#[command(name = "scap")]
#[command(about = "🎞️ Grab converted frames from a decoded video stream")]
#[command(long_about = "Grab the latest decoded frames from a video pipeline, converted to the pixel format you ask for.
Frames that arrive faster than they are captured are skipped, never queued.")]
struct Args {
    /// Synthetic source size
    #[arg(long, default_value = "1280x720", value_parser = parse_size,
          help = "Test pattern size as WIDTHxHEIGHT")]
    pattern: (u32, u32),

    /// GStreamer launch description
    #[arg(long, help = "GStreamer launch description ending in 'appsink name=sink' (needs the gst-pipeline feature)")]
    launch: Option<String>,

    /// Output pixel format
    #[arg(short, long, default_value = "rgba8",
          help = "Output format: rgb8, rgba8, bgr8, bgra8, rgb32f, rgba32f, gray8, gray32f, nv12, i420")]
    format: ImageFormat,

    /// Per-frame timeout
    #[arg(short, long, default_value = "1s", value_parser = parse_timeout,
          help = "How long to wait for each frame: 500ms, 2s, forever")]
    timeout: Duration,

    /// Frames to capture
    #[arg(short = 'n', long, default_value_t = 1)]
    frames: usize,

    /// Ring slots
    #[arg(long, default_value_t = 4, help = "Slots in the raw and output rings (1-64)")]
    buffers: usize,

    /// Keep output frames in heap memory
    #[arg(long, help = "Use heap memory instead of shared mappings for output frames")]
    no_zero_copy: bool,

    /// Test pattern frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// End the test pattern after this many frames
    #[arg(long)]
    limit: Option<u64>,

    /// Consecutive timeouts tolerated before giving up
    #[arg(long, default_value_t = 3)]
    retries: usize,

    /// Directory to write PNG frames into
    #[arg(short, long, help = "Save each frame as PNG (rgb8, rgba8 or gray8 only)")]
    save: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("stream_capture=info,scap=info")),
        )
        .init();

    let args = Args::parse();

    if args.save.is_some() && png_color(args.format).is_none() {
        bail!("--save needs rgb8, rgba8 or gray8 output, not {}", args.format);
    }
    if let Some(dir) = &args.save {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let config = DecoderConfig::new(args.buffers, !args.no_zero_copy);
    config.validate().map_err(anyhow::Error::msg)?;

    let pipeline = build_pipeline(&args)?;
    let engine = CaptureEngine::with_cpu_converter(pipeline, config)?;
    let mut source = EngineSource::new(engine, args.format, args.timeout);
    source.initialize().await?;

    let mut captured = 0;
    let mut timeouts = 0;
    while captured < args.frames {
        match source.next_frame().await {
            Ok(frame) => {
                timeouts = 0;
                captured += 1;
                println!(
                    "frame #{:<6} {}x{} {} ({} bytes)",
                    frame.sequence,
                    frame.width,
                    frame.height,
                    frame.format,
                    frame.data.len()
                );
                if let Some(dir) = &args.save {
                    save_png(dir, &frame)?;
                }
            }
            Err(e) if e.is_timeout() && timeouts < args.retries => {
                timeouts += 1;
                eprintln!("No frame within {:?}, retrying ({timeouts}/{})", args.timeout, args.retries);
            }
            Err(e) if e.is_stream_ended() => {
                println!("End of stream after {captured} frames");
                break;
            }
            Err(e) => {
                if e.is_timeout() {
                    eprintln!("Giving up after {timeouts} retries");
                }
                source.shutdown().await?;
                return Err(e.into());
            }
        }
    }

    source.shutdown().await?;
    let stats = source.stats();
    println!(
        "Captured {} frames ({} received, {} dropped, {} malformed)",
        stats.frames_captured, stats.frames_received, stats.frames_dropped, stats.frames_malformed
    );
    Ok(())
}

fn build_pipeline(args: &Args) -> Result<Box<dyn DecodePipeline>> {
    if let Some(description) = &args.launch {
        #[cfg(feature = "gst-pipeline")]
        return Ok(Box::new(stream_capture::pipeline::gst::GstPipeline::launch(description)?));
        #[cfg(not(feature = "gst-pipeline"))]
        bail!("--launch '{description}' needs a build with: cargo run --features gst-pipeline");
    }

    let (width, height) = args.pattern;
    let mut pattern = TestPattern::new(width, height).with_fps(args.fps);
    if let Some(limit) = args.limit {
        pattern = pattern.with_limit(limit);
    }
    Ok(Box::new(pattern))
}

fn png_color(format: ImageFormat) -> Option<image::ColorType> {
    match format {
        ImageFormat::Rgb8 => Some(image::ColorType::Rgb8),
        ImageFormat::Rgba8 => Some(image::ColorType::Rgba8),
        ImageFormat::Gray8 => Some(image::ColorType::L8),
        _ => None,
    }
}

fn save_png(dir: &Path, frame: &Frame) -> Result<()> {
    let Some(color) = png_color(frame.format) else {
        bail!("cannot save {} frames as PNG", frame.format);
    };
    let path = dir.join(format!("frame_{:06}.png", frame.sequence));
    image::save_buffer(&path, &frame.data, frame.width, frame.height, color)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("  saved {}", path.display());
    Ok(())
}

//! # Decoder Configuration
//!
//! Settings for a [`CaptureEngine`](crate::engine::CaptureEngine), shared by
//! the CLI and library callers.
//!
//! ## Configuration Parameters
//!
//! | Parameter | Type | Range | Default | Description |
//! |-----------|------|-------|---------|-------------|
//! | `num_buffers` | `usize` | 1-64 | 4 | Slots in the raw and output rings |
//! | `zero_copy` | `bool` | | `true` | Map output slots over shared memory |
//! | `open_settle_ms` | `u64` | 1-10000 | 100 | Wait for an asynchronous start |
//! | `close_settle_ms` | `u64` | 1-10000 | 250 | Wait for a stop to drain |
//! | `poll_interval_ms` | `u64` | 1-settle | 10 | Status message polling period |
//!
//! ## Timeout Formats
//!
//! [`parse_timeout`] accepts `500ms`, `2s`, a bare number of milliseconds, or
//! `forever`.
//!
//! ## Examples
//!
//! ```rust
//! use stream_capture::config::DecoderConfig;
//!
//! let config = DecoderConfig {
//!     num_buffers: 8,
//!     zero_copy: false,
//!     ..DecoderConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::error::{CaptureError, CaptureResult};

pub const MAX_BUFFERS: usize = 64;
pub const MAX_SETTLE_MS: u64 = 10_000;

/// Ring sizing and lifecycle timing for a capture engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Number of slots in each ring.
    ///
    /// More slots let the caller hold more converted frames at once. The raw
    /// ring always delivers the latest frame, so extra slots never add latency.
    pub num_buffers: usize,

    /// Whether converted frames live in file-backed shared mappings instead of
    /// heap memory. The raw ring is always mapped.
    pub zero_copy: bool,

    /// How long `open` waits for an asynchronous start to confirm.
    pub open_settle_ms: u64,

    /// How long `close` drains status messages after requesting a stop.
    pub close_settle_ms: u64,

    /// Sleep between status message polls while settling.
    pub poll_interval_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            num_buffers: 4,
            zero_copy: true,
            open_settle_ms: 100,
            close_settle_ms: 250,
            poll_interval_ms: 10,
        }
    }
}

impl DecoderConfig {
    pub fn new(num_buffers: usize, zero_copy: bool) -> Self {
        Self {
            num_buffers,
            zero_copy,
            ..Self::default()
        }
    }

    pub fn open_settle(&self) -> Duration {
        Duration::from_millis(self.open_settle_ms)
    }

    pub fn close_settle(&self) -> Duration {
        Duration::from_millis(self.close_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self.violation() {
            Some((field, value, reason)) => Err(format!("{field} {reason} (got {value})")),
            None => Ok(()),
        }
    }

    /// Same checks as [`validate`](Self::validate), as a [`CaptureError::Config`].
    pub fn check(&self) -> CaptureResult<()> {
        match self.violation() {
            Some((field, value, reason)) => Err(CaptureError::config(field, value, reason)),
            None => Ok(()),
        }
    }

    fn violation(&self) -> Option<(&'static str, String, String)> {
        if !(1..=MAX_BUFFERS).contains(&self.num_buffers) {
            return Some((
                "num_buffers",
                self.num_buffers.to_string(),
                format!("must be between 1 and {MAX_BUFFERS}"),
            ));
        }
        for (field, value) in [
            ("open_settle_ms", self.open_settle_ms),
            ("close_settle_ms", self.close_settle_ms),
        ] {
            if !(1..=MAX_SETTLE_MS).contains(&value) {
                return Some((
                    field,
                    value.to_string(),
                    format!("must be between 1 and {MAX_SETTLE_MS}"),
                ));
            }
        }
        let ceiling = self.open_settle_ms.min(self.close_settle_ms);
        if self.poll_interval_ms == 0 || self.poll_interval_ms > ceiling {
            return Some((
                "poll_interval_ms",
                self.poll_interval_ms.to_string(),
                format!("must be between 1 and {ceiling}"),
            ));
        }
        None
    }
}

/// Parse a timeout like "500ms", "2s", "250" (milliseconds) or "forever".
pub fn parse_timeout(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("forever") {
        return Ok(Duration::MAX);
    }
    if let Ok(ms) = input.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    let (number, scale) = if let Some(n) = input.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = input.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = input.strip_suffix('m') {
        (n, 60_000)
    } else {
        return Err(format!("Invalid timeout: {input}. Use 500ms, 2s, 1m or forever"));
    };
    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in timeout: {number}"))?;
    value
        .checked_mul(scale)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Timeout too large: {input}"))
}

/// Parse a frame size like "1920x1080".
pub fn parse_size(input: &str) -> Result<(u32, u32), String> {
    let (w, h) = input
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Invalid size: {input}. Use WIDTHxHEIGHT, e.g. 1280x720"))?;
    let width: u32 = w
        .parse()
        .map_err(|_| format!("Invalid width in size: {w}"))?;
    let height: u32 = h
        .parse()
        .map_err(|_| format!("Invalid height in size: {h}"))?;
    if width == 0 || height == 0 {
        return Err(format!("Size must be at least 1x1, got {input}"));
    }
    Ok((width, height))
}

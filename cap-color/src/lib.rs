// SPDX-License-Identifier: MIT
//! # cap-color: Pixel Formats and Colorspace Conversion
//!
//! This crate owns the pixel-format vocabulary shared by the capture core and
//! its converters, and the [`ColorConverter`] seam the capture core drives.
//!
//! ## Key Components
//!
//! - [`format`]: [`ImageFormat`] with tightly-packed byte size computation
//! - [`cpu`]: [`CpuConverter`], a BT.601 reference converter for NV12/I420 input
//!
//! ## Usage Example
//!
//! ```rust
//! use cap_color::{ColorConverter, CpuConverter, ImageFormat};
//!
//! let (w, h) = (4u32, 2u32);
//! let nv12 = vec![128u8; ImageFormat::Nv12.size(w, h).unwrap()];
//! let mut rgba = vec![0u8; ImageFormat::Rgba8.size(w, h).unwrap()];
//!
//! CpuConverter::new()
//!     .convert(&nv12, ImageFormat::Nv12, &mut rgba, ImageFormat::Rgba8, w, h)
//!     .unwrap();
//! assert_eq!(rgba[3], 255);
//! ```
//!
//! ## Future Optimizations
//!
//! TODO: Split the row loop across threads for frames above 4K.

pub mod cpu;
pub mod format;

use thiserror::Error;

pub use cpu::CpuConverter;
pub use format::{ImageFormat, ParseFormatError, ALL_FORMATS};

/// Why a conversion was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    /// The converter has no path from `src` to `dst`.
    #[error("unsupported conversion {src} -> {dst}")]
    Unsupported { src: ImageFormat, dst: ImageFormat },
    /// A buffer is shorter than the format and dimensions require.
    #[error("{which} buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        which: &'static str,
        needed: usize,
        got: usize,
    },
    /// The image byte size does not fit in memory.
    #[error("image size {width}x{height} overflows")]
    Overflow { width: u32, height: u32 },
}

/// Transforms one pixel buffer into another format.
///
/// Implementations write exactly `dst_format.size(width, height)` bytes at
/// the start of `dst`. The capture core treats the set of supported formats as
/// opaque and only reacts to [`ConvertError::Unsupported`].
pub trait ColorConverter: Send {
    fn convert(
        &mut self,
        src: &[u8],
        src_format: ImageFormat,
        dst: &mut [u8],
        dst_format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<(), ConvertError>;

    /// Destination formats accepted for `src_format`. Used for diagnostics.
    fn supported_outputs(&self, src_format: ImageFormat) -> Vec<ImageFormat>;
}

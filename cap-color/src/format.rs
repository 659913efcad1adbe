// SPDX-License-Identifier: MIT
//! # Pixel Formats
//!
//! The set of pixel layouts a decoded frame can arrive in, and the layouts a
//! converter can be asked to produce.
//!
//! ## Layouts
//!
//! - **Packed**: one interleaved plane (`rgb8`, `rgba8`, `bgr8`, `bgra8`,
//!   `gray8`) or the float variants (`rgb32f`, `rgba32f`, `gray32f`) where
//!   every channel is an `f32` in the 0..255 range.
//! - **Planar YUV 4:2:0**: `nv12` (Y plane + interleaved UV plane) and `i420`
//!   (Y plane + U plane + V plane). Chroma planes are subsampled by two in both
//!   directions, rounding up for odd dimensions.
//!
//! Byte sizes are always tightly packed (no row padding).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Pixel layout of a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Rgb8,
    Rgba8,
    Bgr8,
    Bgra8,
    Rgb32f,
    Rgba32f,
    Gray8,
    Gray32f,
    Nv12,
    I420,
}

/// Every format, in the order they are listed to users.
pub const ALL_FORMATS: [ImageFormat; 10] = [
    ImageFormat::Rgb8,
    ImageFormat::Rgba8,
    ImageFormat::Bgr8,
    ImageFormat::Bgra8,
    ImageFormat::Rgb32f,
    ImageFormat::Rgba32f,
    ImageFormat::Gray8,
    ImageFormat::Gray32f,
    ImageFormat::Nv12,
    ImageFormat::I420,
];

/// Returned when a format name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown image format '{0}' (expected one of: rgb8, rgba8, bgr8, bgra8, rgb32f, rgba32f, gray8, gray32f, nv12, i420)")]
pub struct ParseFormatError(pub String);

impl ImageFormat {
    /// Lower-case name used on the command line and in logs.
    pub fn name(self) -> &'static str {
        match self {
            ImageFormat::Rgb8 => "rgb8",
            ImageFormat::Rgba8 => "rgba8",
            ImageFormat::Bgr8 => "bgr8",
            ImageFormat::Bgra8 => "bgra8",
            ImageFormat::Rgb32f => "rgb32f",
            ImageFormat::Rgba32f => "rgba32f",
            ImageFormat::Gray8 => "gray8",
            ImageFormat::Gray32f => "gray32f",
            ImageFormat::Nv12 => "nv12",
            ImageFormat::I420 => "i420",
        }
    }

    /// True for the planar 4:2:0 layouts.
    pub fn is_yuv(self) -> bool {
        matches!(self, ImageFormat::Nv12 | ImageFormat::I420)
    }

    /// Number of interleaved channels for packed formats, `None` for planar ones.
    pub fn channels(self) -> Option<usize> {
        match self {
            ImageFormat::Gray8 | ImageFormat::Gray32f => Some(1),
            ImageFormat::Rgb8 | ImageFormat::Bgr8 | ImageFormat::Rgb32f => Some(3),
            ImageFormat::Rgba8 | ImageFormat::Bgra8 | ImageFormat::Rgba32f => Some(4),
            ImageFormat::Nv12 | ImageFormat::I420 => None,
        }
    }

    /// Bytes used by one channel value.
    pub fn bytes_per_channel(self) -> usize {
        match self {
            ImageFormat::Rgb32f | ImageFormat::Rgba32f | ImageFormat::Gray32f => 4,
            _ => 1,
        }
    }

    /// Tightly packed byte size of a `width` x `height` image.
    ///
    /// Returns `None` if the size overflows `usize`.
    pub fn size(self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        let pixels = w.checked_mul(h)?;
        match self.channels() {
            Some(c) => pixels.checked_mul(c)?.checked_mul(self.bytes_per_channel()),
            None => {
                let chroma = w.div_ceil(2).checked_mul(h.div_ceil(2))?;
                pixels.checked_add(chroma.checked_mul(2)?)
            }
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ImageFormat {
    type Err = ParseFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "rgb" => return Ok(ImageFormat::Rgb8),
            "rgba" => return Ok(ImageFormat::Rgba8),
            "bgr" => return Ok(ImageFormat::Bgr8),
            "bgra" => return Ok(ImageFormat::Bgra8),
            "gray" => return Ok(ImageFormat::Gray8),
            "yuv420" => return Ok(ImageFormat::I420),
            _ => {}
        }
        ALL_FORMATS
            .iter()
            .copied()
            .find(|f| f.name() == lower)
            .ok_or(ParseFormatError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_sizes() {
        assert_eq!(ImageFormat::Rgba8.size(1920, 1080), Some(1920 * 1080 * 4));
        assert_eq!(ImageFormat::Rgb8.size(640, 480), Some(640 * 480 * 3));
        assert_eq!(ImageFormat::Rgba32f.size(2, 2), Some(2 * 2 * 4 * 4));
        assert_eq!(ImageFormat::Gray8.size(7, 3), Some(21));
    }

    #[test]
    fn test_planar_sizes_round_chroma_up() {
        assert_eq!(ImageFormat::Nv12.size(1920, 1080), Some(1920 * 1080 * 3 / 2));
        assert_eq!(ImageFormat::I420.size(4, 4), Some(24));
        // 3x3 luma + 2x2 chroma pairs
        assert_eq!(ImageFormat::Nv12.size(3, 3), Some(9 + 8));
    }

    #[test]
    fn test_size_overflow() {
        assert_eq!(ImageFormat::Rgba32f.size(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!("RGBA8".parse::<ImageFormat>(), Ok(ImageFormat::Rgba8));
        assert_eq!("rgb".parse::<ImageFormat>(), Ok(ImageFormat::Rgb8));
        assert_eq!("nv12".parse::<ImageFormat>(), Ok(ImageFormat::Nv12));
        assert!("yuyv".parse::<ImageFormat>().is_err());

        for format in ALL_FORMATS {
            assert_eq!(format.to_string().parse::<ImageFormat>(), Ok(format));
        }
    }
}

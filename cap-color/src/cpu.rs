// SPDX-License-Identifier: MIT
// CPU colorspace converter: YUV 4:2:0 (NV12 / I420) in, any packed format out.
// BT.601 limited range, integer arithmetic, direct write into caller-provided dst buffer.

use crate::format::{ImageFormat, ALL_FORMATS};
use crate::{ColorConverter, ConvertError};

const PACKED_OUTPUTS: [ImageFormat; 8] = [
    ImageFormat::Rgb8,
    ImageFormat::Rgba8,
    ImageFormat::Bgr8,
    ImageFormat::Bgra8,
    ImageFormat::Rgb32f,
    ImageFormat::Rgba32f,
    ImageFormat::Gray8,
    ImageFormat::Gray32f,
];

/// Reference converter running on the calling thread.
///
/// Accepts NV12 or I420 input and produces every packed format. Converting a
/// format to itself is a plain copy, so any format is accepted when the source
/// and destination match.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuConverter;

impl CpuConverter {
    pub fn new() -> Self {
        Self
    }
}

impl ColorConverter for CpuConverter {
    fn convert(
        &mut self,
        src: &[u8],
        src_format: ImageFormat,
        dst: &mut [u8],
        dst_format: ImageFormat,
        width: u32,
        height: u32,
    ) -> Result<(), ConvertError> {
        let unsupported = || ConvertError::Unsupported {
            src: src_format,
            dst: dst_format,
        };

        if src_format != dst_format && !(src_format.is_yuv() && !dst_format.is_yuv()) {
            return Err(unsupported());
        }

        let src_len = src_format
            .size(width, height)
            .ok_or(ConvertError::Overflow { width, height })?;
        let dst_len = dst_format
            .size(width, height)
            .ok_or(ConvertError::Overflow { width, height })?;
        if src.len() < src_len {
            return Err(ConvertError::BufferTooSmall {
                which: "source",
                needed: src_len,
                got: src.len(),
            });
        }
        if dst.len() < dst_len {
            return Err(ConvertError::BufferTooSmall {
                which: "destination",
                needed: dst_len,
                got: dst.len(),
            });
        }

        if src_format == dst_format {
            dst[..dst_len].copy_from_slice(&src[..src_len]);
            return Ok(());
        }

        let planes = ChromaPlanes::split(src_format, width as usize, height as usize);
        yuv420_to_packed(src, &planes, &mut dst[..dst_len], dst_format, width as usize, height as usize);
        Ok(())
    }

    fn supported_outputs(&self, src_format: ImageFormat) -> Vec<ImageFormat> {
        if src_format.is_yuv() {
            let mut outputs = PACKED_OUTPUTS.to_vec();
            outputs.push(src_format);
            outputs
        } else {
            ALL_FORMATS
                .iter()
                .copied()
                .filter(|f| *f == src_format)
                .collect()
        }
    }
}

/// Where the chroma samples of a 4:2:0 frame live.
enum ChromaPlanes {
    /// NV12: one plane of interleaved U,V pairs.
    Interleaved { uv: usize, stride: usize },
    /// I420: separate U and V planes.
    Separate { u: usize, v: usize, stride: usize },
}

impl ChromaPlanes {
    fn split(format: ImageFormat, width: usize, height: usize) -> Self {
        let luma = width * height;
        let cw = width.div_ceil(2);
        let ch = height.div_ceil(2);
        match format {
            ImageFormat::I420 => ChromaPlanes::Separate {
                u: luma,
                v: luma + cw * ch,
                stride: cw,
            },
            _ => ChromaPlanes::Interleaved {
                uv: luma,
                stride: cw * 2,
            },
        }
    }

    #[inline]
    fn sample(&self, src: &[u8], x: usize, y: usize) -> (u8, u8) {
        let (cx, cy) = (x / 2, y / 2);
        match *self {
            ChromaPlanes::Interleaved { uv, stride } => {
                let i = uv + cy * stride + cx * 2;
                (src[i], src[i + 1])
            }
            ChromaPlanes::Separate { u, v, stride } => {
                let i = cy * stride + cx;
                (src[u + i], src[v + i])
            }
        }
    }
}

fn yuv420_to_packed(
    src: &[u8],
    planes: &ChromaPlanes,
    dst: &mut [u8],
    format: ImageFormat,
    width: usize,
    height: usize,
) {
    let pixel_bytes = format.channels().unwrap_or(1) * format.bytes_per_channel();
    let row_bytes = width * pixel_bytes;

    for (y, row) in dst.chunks_exact_mut(row_bytes).take(height).enumerate() {
        let luma_row = &src[y * width..(y + 1) * width];
        for (x, px) in row.chunks_exact_mut(pixel_bytes).enumerate() {
            let (u, v) = planes.sample(src, x, y);
            let (rgb, gray) = bt601(luma_row[x], u, v);
            emit(format, px, rgb, gray);
        }
    }
}

/// BT.601 limited-range YUV to full-range RGB, plus the expanded luma.
#[inline]
fn bt601(y: u8, u: u8, v: u8) -> ([u8; 3], u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;
    let l = (298 * c + 128) >> 8;
    ([clamp_u8(r), clamp_u8(g), clamp_u8(b)], clamp_u8(l))
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn emit(format: ImageFormat, px: &mut [u8], [r, g, b]: [u8; 3], gray: u8) {
    match format {
        ImageFormat::Rgb8 => px.copy_from_slice(&[r, g, b]),
        ImageFormat::Rgba8 => px.copy_from_slice(&[r, g, b, 255]),
        ImageFormat::Bgr8 => px.copy_from_slice(&[b, g, r]),
        ImageFormat::Bgra8 => px.copy_from_slice(&[b, g, r, 255]),
        ImageFormat::Gray8 => px[0] = gray,
        ImageFormat::Rgb32f => write_f32(px, &[r as f32, g as f32, b as f32]),
        ImageFormat::Rgba32f => write_f32(px, &[r as f32, g as f32, b as f32, 255.0]),
        ImageFormat::Gray32f => write_f32(px, &[gray as f32]),
        // planar outputs are rejected before the pixel loop
        ImageFormat::Nv12 | ImageFormat::I420 => {}
    }
}

#[inline]
fn write_f32(px: &mut [u8], values: &[f32]) {
    for (dst, v) in px.chunks_exact_mut(4).zip(values) {
        dst.copy_from_slice(&v.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nv12_solid(width: u32, height: u32, y: u8, u: u8, v: u8) -> Vec<u8> {
        let luma = (width * height) as usize;
        let total = ImageFormat::Nv12.size(width, height).unwrap();
        let mut data = vec![y; total];
        for pair in data[luma..].chunks_exact_mut(2) {
            pair[0] = u;
            pair[1] = v;
        }
        data
    }

    #[test]
    fn test_white_and_black_nv12_to_rgba8() {
        let mut conv = CpuConverter::new();
        let mut dst = vec![0u8; ImageFormat::Rgba8.size(4, 2).unwrap()];

        let white = nv12_solid(4, 2, 235, 128, 128);
        conv.convert(&white, ImageFormat::Nv12, &mut dst, ImageFormat::Rgba8, 4, 2)
            .unwrap();
        assert!(dst.chunks_exact(4).all(|p| p == [255, 255, 255, 255]));

        let black = nv12_solid(4, 2, 16, 128, 128);
        conv.convert(&black, ImageFormat::Nv12, &mut dst, ImageFormat::Rgba8, 4, 2)
            .unwrap();
        assert!(dst.chunks_exact(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn test_strong_red_chroma_dominates_red_channel() {
        let mut conv = CpuConverter::new();
        let src = nv12_solid(2, 2, 81, 90, 240);
        let mut dst = vec![0u8; 12];
        conv.convert(&src, ImageFormat::Nv12, &mut dst, ImageFormat::Bgr8, 2, 2)
            .unwrap();
        let (b, g, r) = (dst[0], dst[1], dst[2]);
        assert!(r > 200, "red channel was {r}");
        assert!(g < 60 && b < 60, "g={g} b={b}");
    }

    #[test]
    fn test_i420_matches_nv12() {
        let (w, h) = (6u32, 4u32);
        let luma = (w * h) as usize;
        let chroma = ImageFormat::I420.size(w, h).unwrap() - luma;
        let quarter = chroma / 2;

        let mut i420 = vec![0u8; luma + chroma];
        let mut nv12 = vec![0u8; luma + chroma];
        for i in 0..luma {
            let y = 16 + (i * 7 % 200) as u8;
            i420[i] = y;
            nv12[i] = y;
        }
        for i in 0..quarter {
            let (u, v) = (60 + i as u8 * 10, 200 - i as u8 * 10);
            i420[luma + i] = u;
            i420[luma + quarter + i] = v;
            nv12[luma + i * 2] = u;
            nv12[luma + i * 2 + 1] = v;
        }

        let mut conv = CpuConverter::new();
        let mut a = vec![0u8; ImageFormat::Rgb8.size(w, h).unwrap()];
        let mut b = a.clone();
        conv.convert(&i420, ImageFormat::I420, &mut a, ImageFormat::Rgb8, w, h)
            .unwrap();
        conv.convert(&nv12, ImageFormat::Nv12, &mut b, ImageFormat::Rgb8, w, h)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_float_output_uses_0_to_255_range() {
        let mut conv = CpuConverter::new();
        let src = nv12_solid(2, 2, 235, 128, 128);
        let mut dst = vec![0u8; ImageFormat::Rgba32f.size(2, 2).unwrap()];
        conv.convert(&src, ImageFormat::Nv12, &mut dst, ImageFormat::Rgba32f, 2, 2)
            .unwrap();
        let first: Vec<f32> = dst[..16]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(first, vec![255.0, 255.0, 255.0, 255.0]);
    }

    #[test]
    fn test_odd_dimensions() {
        let mut conv = CpuConverter::new();
        let src = nv12_solid(3, 3, 126, 128, 128);
        let mut dst = vec![0u8; 9];
        conv.convert(&src, ImageFormat::Nv12, &mut dst, ImageFormat::Gray8, 3, 3)
            .unwrap();
        assert!(dst.iter().all(|&g| g == 128));
    }

    #[test]
    fn test_identity_copy() {
        let mut conv = CpuConverter::new();
        let src: Vec<u8> = (0..24).collect();
        let mut dst = vec![0u8; 24];
        conv.convert(&src, ImageFormat::Rgb8, &mut dst, ImageFormat::Rgb8, 4, 2)
            .unwrap();
        assert_eq!(src, dst);
    }

    #[test]
    fn test_rejects_unsupported_pairs() {
        let mut conv = CpuConverter::new();
        let src = vec![0u8; 32];
        let mut dst = vec![0u8; 32];
        let err = conv
            .convert(&src, ImageFormat::Rgba8, &mut dst, ImageFormat::Nv12, 2, 2)
            .unwrap_err();
        assert_eq!(
            err,
            ConvertError::Unsupported {
                src: ImageFormat::Rgba8,
                dst: ImageFormat::Nv12
            }
        );
        assert!(conv
            .convert(&src, ImageFormat::Nv12, &mut dst, ImageFormat::I420, 2, 2)
            .is_err());
    }

    #[test]
    fn test_buffer_too_small() {
        let mut conv = CpuConverter::new();
        let src = nv12_solid(4, 4, 100, 128, 128);
        let mut dst = vec![0u8; 10];
        let err = conv
            .convert(&src, ImageFormat::Nv12, &mut dst, ImageFormat::Rgba8, 4, 4)
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::BufferTooSmall {
                which: "destination",
                needed: 64,
                got: 10
            }
        ));
    }

    #[test]
    fn test_supported_outputs() {
        let conv = CpuConverter::new();
        let outs = conv.supported_outputs(ImageFormat::Nv12);
        assert!(outs.contains(&ImageFormat::Rgba8));
        assert!(outs.contains(&ImageFormat::Nv12));
        assert!(!outs.contains(&ImageFormat::I420));
        assert_eq!(conv.supported_outputs(ImageFormat::Rgb8), vec![ImageFormat::Rgb8]);
    }
}

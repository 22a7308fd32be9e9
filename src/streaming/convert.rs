//! CPU pixel conversions of stream buffers into RGBA8.
//!
//! These are for saving and inspecting frames, not for display.

use glam::{DMat4, IVec2};
use half::f16;
use thiserror::Error;

use crate::runtime::{BufferMetadata, CameraIntrinsics, StreamFormat};

use super::undistort::Undistorter;

/// Bytes per converted pixel.
pub const RGBA_COMPONENTS: usize = 4;

/// Background the RGBA16F cubemap is blended over.
pub const RGBA16F_BACKGROUND: [f32; 3] = [0.25, 0.45, 0.40];

const GAMMA: f32 = 1.0 / 2.2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Unsupported pixel format: {0:?}")]
    UnsupportedFormat(StreamFormat),
    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },
    #[error("Invalid buffer dimensions {width}x{height} with stride {row_stride}")]
    InvalidDimensions {
        width: i32,
        height: i32,
        row_stride: i32,
    },
}

/// BT.601 conversion with the studio-swing `C = Y - 16` terms.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    [
        ((298 * c + 409 * e + 128) >> 8).clamp(0, 255) as u8,
        ((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8,
        ((298 * c + 516 * d + 128) >> 8).clamp(0, 255) as u8,
    ]
}

const fn y8_to_rgba(y: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let mut grey = (298 * c + 128) >> 8;
    if grey < 0 {
        grey = 0;
    }
    if grey > 255 {
        grey = 255;
    }
    let grey = grey as u8;
    [grey, grey, grey, 255]
}

const fn build_y8_lut() -> [[u8; 4]; 256] {
    let mut lut = [[0u8; 4]; 256];
    let mut i = 0;
    while i < 256 {
        lut[i] = y8_to_rgba(i as u8);
        i += 1;
    }
    lut
}

/// Y8 luminance to opaque grey RGBA.
pub static Y8_TO_RGBA: [[u8; 4]; 256] = build_y8_lut();

fn dimensions(buffer: &BufferMetadata) -> Result<(usize, usize, usize), ConvertError> {
    if buffer.width <= 0 || buffer.height <= 0 || buffer.row_stride < 0 {
        return Err(ConvertError::InvalidDimensions {
            width: buffer.width,
            height: buffer.height,
            row_stride: buffer.row_stride,
        });
    }
    Ok((
        buffer.width as usize,
        buffer.height as usize,
        buffer.row_stride as usize,
    ))
}

fn check_len(input: &[u8], needed: usize) -> Result<(), ConvertError> {
    if input.len() < needed {
        return Err(ConvertError::BufferTooSmall {
            needed,
            actual: input.len(),
        });
    }
    Ok(())
}

/// Size in bytes `to_rgba8` reads for a buffer.
pub fn input_size(buffer: &BufferMetadata) -> Result<usize, ConvertError> {
    let (width, height, stride) = dimensions(buffer)?;
    match buffer.format {
        StreamFormat::Nv12 => Ok(stride * height + stride * height.div_ceil(2)),
        StreamFormat::Y8 => Ok(stride * (height - 1) + width),
        StreamFormat::Rgba16Float => Ok(stride * (height - 1) + width * 8),
    }
}

/// Convert a locked CPU buffer into tightly packed RGBA8.
pub fn to_rgba8(buffer: &BufferMetadata, input: &[u8]) -> Result<Vec<u8>, ConvertError> {
    let (width, height, _) = dimensions(buffer)?;
    let mut output = vec![0u8; width * height * RGBA_COMPONENTS];
    to_rgba8_into(buffer, input, &mut output, 0)?;
    Ok(output)
}

/// Convert into `output`, whose rows are `output_row_stride` bytes apart
/// (0 for tightly packed).
pub fn to_rgba8_into(
    buffer: &BufferMetadata,
    input: &[u8],
    output: &mut [u8],
    output_row_stride: usize,
) -> Result<(), ConvertError> {
    let (width, height, stride) = dimensions(buffer)?;
    let out_stride = if output_row_stride == 0 {
        width * RGBA_COMPONENTS
    } else {
        output_row_stride
    };
    check_len(input, input_size(buffer)?)?;
    let needed = out_stride * (height - 1) + width * RGBA_COMPONENTS;
    if output.len() < needed {
        return Err(ConvertError::BufferTooSmall {
            needed,
            actual: output.len(),
        });
    }

    match buffer.format {
        StreamFormat::Nv12 => {
            let (luma, chroma) = input.split_at(stride * height);
            for y in 0..height {
                let line = &mut output[y * out_stride..][..width * RGBA_COMPONENTS];
                let luma_row = &luma[y * stride..];
                let uv_row = &chroma[(y / 2) * stride..];
                for x in 0..width {
                    let uv_x = x & !1;
                    let [r, g, b] = yuv_to_rgb(luma_row[x], uv_row[uv_x], uv_row[uv_x + 1]);
                    line[x * 4..x * 4 + 4].copy_from_slice(&[r, g, b, 255]);
                }
            }
        }
        StreamFormat::Y8 => {
            for y in 0..height {
                let line = &mut output[y * out_stride..][..width * RGBA_COMPONENTS];
                let row = &input[y * stride..][..width];
                for (pixel, &luma) in line.chunks_exact_mut(4).zip(row) {
                    pixel.copy_from_slice(&Y8_TO_RGBA[luma as usize]);
                }
            }
        }
        StreamFormat::Rgba16Float => {
            let half = |bytes: &[u8], i: usize| {
                f16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]).to_f32()
            };
            for y in 0..height {
                let line = &mut output[y * out_stride..][..width * RGBA_COMPONENTS];
                let row = &input[y * stride..][..width * 8];
                for x in 0..width {
                    let alpha = half(row, x * 4 + 3);
                    for c in 0..3 {
                        // Stream values are linear.
                        let value = half(row, x * 4 + c).powf(GAMMA);
                        let value = value * alpha + RGBA16F_BACKGROUND[c] * (1.0 - alpha);
                        line[x * 4 + c] = (255.0 * value).clamp(0.0, 255.0) as u8;
                    }
                    line[x * 4 + 3] = 255;
                }
            }
        }
    }
    Ok(())
}

/// Resample a distorted NV12 camera buffer into a rectified RGBA8 image of
/// `output_size`. Samples falling outside the source are black.
///
/// Runs on the CPU over every output pixel; meant for inspection only.
pub fn distorted_yuv_to_rectified_rgba(
    buffer: &BufferMetadata,
    input: &[u8],
    output_size: IVec2,
    extrinsics: &DMat4,
    intrinsics: &CameraIntrinsics,
    projection: Option<&DMat4>,
) -> Result<Vec<u8>, ConvertError> {
    if buffer.format != StreamFormat::Nv12 {
        return Err(ConvertError::UnsupportedFormat(buffer.format));
    }
    let (width, height, stride) = dimensions(buffer)?;
    check_len(input, input_size(buffer)?)?;
    if output_size.x <= 0 || output_size.y <= 0 {
        return Err(ConvertError::InvalidDimensions {
            width: output_size.x,
            height: output_size.y,
            row_stride: output_size.x * RGBA_COMPONENTS as i32,
        });
    }

    let input_size = IVec2::new(width as i32, height as i32);
    let undistorter = Undistorter::new(input_size, output_size, intrinsics, extrinsics, projection);
    let (luma, chroma) = input.split_at(stride * height);

    let mut output = Vec::with_capacity((output_size.x * output_size.y) as usize * RGBA_COMPONENTS);
    for y in 0..output_size.y {
        for x in 0..output_size.x {
            let sample = undistorter.sample_coord(x, y);
            let rgb = if sample.cmpge(IVec2::ZERO).all() && sample.cmplt(input_size).all() {
                let (sx, sy) = (sample.x as usize, sample.y as usize);
                let uv = (sy / 2) * stride + (sx & !1);
                yuv_to_rgb(luma[sy * stride + sx], chroma[uv], chroma[uv + 1])
            } else {
                [0, 0, 0]
            };
            output.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BufferType;

    fn metadata(format: StreamFormat, width: i32, height: i32, row_stride: i32) -> BufferMetadata {
        BufferMetadata {
            format,
            buffer_type: BufferType::Cpu,
            byte_size: 0,
            row_stride,
            width,
            height,
        }
    }

    #[test]
    fn test_yuv_to_rgb() {
        assert_eq!(yuv_to_rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(235, 128, 128), [255, 255, 255]);
        assert_eq!(yuv_to_rgb(128, 128, 128), [130, 130, 130]);
        // Saturated red clamps the blue channel.
        let [r, _, b] = yuv_to_rgb(82, 90, 240);
        assert!(r > 240);
        assert_eq!(b, 0);
    }

    #[test]
    fn test_y8_lut() {
        assert_eq!(Y8_TO_RGBA[0], [0, 0, 0, 255]);
        assert_eq!(Y8_TO_RGBA[16], [0, 0, 0, 255]);
        assert_eq!(Y8_TO_RGBA[255], [255, 255, 255, 255]);
        assert!(Y8_TO_RGBA.windows(2).all(|w| w[0][0] <= w[1][0]));
    }

    #[test]
    fn test_nv12_shares_chroma_per_pixel_pair() {
        let meta = metadata(StreamFormat::Nv12, 4, 2, 4);
        let mut input = vec![128u8; 4 * 2 + 4];
        // Second UV pair turns the right half blue.
        input[8 + 2] = 240;
        input[8 + 3] = 110;
        let rgba = to_rgba8(&meta, &input).unwrap();
        assert_eq!(&rgba[0..4], &rgba[4..8]);
        assert_eq!(&rgba[8..12], &rgba[12..16]);
        assert_ne!(&rgba[0..4], &rgba[8..12]);
        // Both rows use the same chroma row.
        assert_eq!(&rgba[0..16], &rgba[16..32]);
    }

    #[test]
    fn test_y8_honours_stride() {
        let meta = metadata(StreamFormat::Y8, 2, 2, 4);
        let input = [16, 235, 0, 0, 235, 16, 0, 0];
        let rgba = to_rgba8(&meta, &input).unwrap();
        assert_eq!(rgba[0], 0);
        assert_eq!(rgba[4], 255);
        assert_eq!(rgba[8], 255);
        assert_eq!(rgba[12], 0);
    }

    #[test]
    fn test_rgba16f_blends_over_background() {
        let meta = metadata(StreamFormat::Rgba16Float, 2, 1, 16);
        let pixels = [
            f16::ONE,
            f16::ZERO,
            f16::ZERO,
            f16::ONE,
            f16::ONE,
            f16::ONE,
            f16::ONE,
            f16::ZERO,
        ];
        let input: Vec<u8> = pixels.iter().flat_map(|h| h.to_le_bytes()).collect();
        let rgba = to_rgba8(&meta, &input).unwrap();
        assert_eq!(&rgba[0..4], &[255, 0, 0, 255]);
        // Fully transparent shows the background.
        assert_eq!(&rgba[4..8], &[63, 114, 102, 255]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let meta = metadata(StreamFormat::Nv12, 4, 4, 4);
        let err = to_rgba8(&meta, &[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            ConvertError::BufferTooSmall {
                needed: 24,
                actual: 10
            }
        );
    }

    #[test]
    fn test_rectified_rgba() {
        let meta = metadata(StreamFormat::Nv12, 64, 48, 64);
        let input = vec![128u8; 64 * 48 * 3 / 2];
        let intrinsics = CameraIntrinsics {
            principal_point_x: 0.5,
            principal_point_y: 0.5,
            focal_length_x: 0.5,
            focal_length_y: 0.5,
            ..Default::default()
        };
        let size = IVec2::new(101, 101);
        let rgba = distorted_yuv_to_rectified_rgba(
            &meta,
            &input,
            size,
            &DMat4::IDENTITY,
            &intrinsics,
            None,
        )
        .unwrap();
        assert_eq!(rgba.len(), 101 * 101 * 4);
        let center = (50 * 101 + 50) * 4;
        assert_eq!(&rgba[center..center + 4], &[130, 130, 130, 255]);
        // The corners see past the edge of the camera image.
        assert_eq!(&rgba[0..4], &[0, 0, 0, 255]);

        let y8 = metadata(StreamFormat::Y8, 64, 48, 64);
        assert_eq!(
            distorted_yuv_to_rectified_rgba(&y8, &input, size, &DMat4::IDENTITY, &intrinsics, None),
            Err(ConvertError::UnsupportedFormat(StreamFormat::Y8))
        );
    }
}

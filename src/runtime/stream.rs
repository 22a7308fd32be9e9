//! Data-stream types: stream configurations, frames, buffers and camera calibration.

use std::sync::Arc;

use bitflags::bitflags;
use glam::DMat4;

/// Runtime stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamType {
    DistortedColor,
    EnvironmentCubemap,
    EyeCamera,
}

/// Pixel format of stream buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamFormat {
    /// YUV 4:2:0 with an interleaved UV plane.
    Nv12,
    /// 8-bit luminance.
    Y8,
    /// 16-bit float RGBA.
    Rgba16Float,
}

impl StreamFormat {
    pub fn name(self) -> &'static str {
        match self {
            Self::Nv12 => "NV12",
            Self::Y8 => "Y8",
            Self::Rgba16Float => "RGBA16F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Cpu,
    Gpu,
}

bitflags! {
    /// Stream channels. Stereo streams use `FIRST` for left and `SECOND` for right.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelFlags: u32 {
        const FIRST = 1 << 0;
        const SECOND = 1 << 1;
        const LEFT = Self::FIRST.bits();
        const RIGHT = Self::SECOND.bits();
        const ALL = Self::FIRST.bits() | Self::SECOND.bits();
    }
}

impl ChannelFlags {
    /// Flag of a channel index (0 or 1).
    pub fn from_index(index: usize) -> Self {
        Self::from_bits_truncate(1 << index)
    }
}

bitflags! {
    /// What data a stream frame carries per channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DataFlags: u32 {
        const BUFFER = 1 << 0;
        const INTRINSICS = 1 << 1;
        const EXTRINSICS = 1 << 2;
    }
}

/// Description of a stream the runtime can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub stream_id: StreamId,
    pub stream_type: StreamType,
    pub buffer_type: BufferType,
    pub format: StreamFormat,
    pub channel_flags: ChannelFlags,
    pub frame_rate: i32,
    pub width: i32,
    pub height: i32,
    pub row_stride: i32,
}

/// Runtime buffer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub i64);

impl BufferId {
    pub const INVALID: Self = Self(-1);

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

/// Layout of a locked stream buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMetadata {
    pub format: StreamFormat,
    pub buffer_type: BufferType,
    pub byte_size: i32,
    pub row_stride: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraIntrinsicsModel {
    #[default]
    Omnidir,
}

/// Camera calibration. Principal point and focal lengths are normalized to the image size.
///
/// `distortion_coefficients` holds `[k1, k2, skew, xi, p1, p2]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CameraIntrinsics {
    pub model: CameraIntrinsicsModel,
    pub principal_point_x: f64,
    pub principal_point_y: f64,
    pub focal_length_x: f64,
    pub focal_length_y: f64,
    pub distortion_coefficients: [f64; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CubemapMode {
    #[default]
    Fixed6500K,
    AutoAdapt,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortedColorMetadata {
    pub timestamp: i64,
    pub ev: f64,
    pub exposure_time: f64,
    pub white_balance_temperature: f64,
    pub camera_calibration_constant: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentCubemapMetadata {
    pub timestamp: i64,
    pub mode: CubemapMode,
    pub color_temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeCameraMetadata {
    pub timestamp: i64,
}

/// Type specific frame metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamFrameMetadata {
    DistortedColor(DistortedColorMetadata),
    EnvironmentCubemap(EnvironmentCubemapMetadata),
    EyeCamera(EyeCameraMetadata),
}

impl StreamFrameMetadata {
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::DistortedColor(m) => m.timestamp,
            Self::EnvironmentCubemap(m) => m.timestamp,
            Self::EyeCamera(m) => m.timestamp,
        }
    }
}

/// Frame delivered to a stream callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFrame {
    pub stream_type: StreamType,
    pub id: StreamId,
    pub frame_number: i64,
    /// Channels present in this frame.
    pub channels: ChannelFlags,
    pub data_flags: DataFlags,
    pub hmd_pose: DMat4,
    pub metadata: StreamFrameMetadata,
}

/// Callback invoked by the runtime on the stream's worker thread.
pub type StreamCallback = Arc<dyn Fn(&StreamFrame) + Send + Sync>;

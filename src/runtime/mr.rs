//! Mixed-reality types: configuration locks, camera properties and chroma keying.

use std::fmt;

use glam::DVec3;

use super::CubemapMode;

/// Configuration areas that must be locked before they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockType {
    Camera,
    EnvironmentCubemap,
    ChromaKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CameraPropertyType {
    ExposureTime,
    IsoValue,
    WhiteBalance,
    FlickerCompensation,
    Sharpness,
    EyeReprojection,
    AutoExposureBehavior,
    FocusDistance,
}

impl CameraPropertyType {
    pub const ALL: [CameraPropertyType; 8] = [
        Self::ExposureTime,
        Self::IsoValue,
        Self::WhiteBalance,
        Self::FlickerCompensation,
        Self::Sharpness,
        Self::EyeReprojection,
        Self::AutoExposureBehavior,
        Self::FocusDistance,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraPropertyMode {
    Off,
    Auto,
    Manual,
}

/// Whether the supported values enumerate every option or only a `[min, max]` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CameraPropertyConfigType {
    #[default]
    List,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraPropertyValue {
    Bool(bool),
    Int(i32),
    Double(f64),
}

impl fmt::Display for CameraPropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v:.2}"),
        }
    }
}

/// HSV chroma-key parameters. All components are in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChromaKeyHsv {
    pub target_color: DVec3,
    pub tolerance: DVec3,
    pub falloff: DVec3,
}

/// Content of one chroma-key slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ChromaKeyConfig {
    #[default]
    Disabled,
    Hsv(ChromaKeyHsv),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EnvironmentCubemapConfig {
    pub mode: CubemapMode,
}

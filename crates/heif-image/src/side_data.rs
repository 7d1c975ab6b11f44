/// NCLX color information per ITU-T H.273.
///
/// The container passes these values through without interpreting them, except that the
/// full-range flag participates in encoder chroma setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NclxColorProfile {
    pub color_primaries: u16,
    pub transfer_characteristics: u16,
    pub matrix_coefficients: u16,
    pub full_range: bool,
}

impl Default for NclxColorProfile {
    fn default() -> Self {
        // 1/13/6/full-range: the sRGB-ish default modern encoders assume.
        Self {
            color_primaries: 1,
            transfer_characteristics: 13,
            matrix_coefficients: 6,
            full_range: true,
        }
    }
}

/// A color profile attached to an image: either NCLX values or an opaque ICC blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorProfile {
    Nclx(NclxColorProfile),
    /// Restricted ICC profile (`rICC`).
    RestrictedIcc(Vec<u8>),
    /// Unrestricted ICC profile (`prof`).
    Icc(Vec<u8>),
}

/// Content light level information (`clli`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    pub max_content_light_level: u16,
    pub max_pic_average_light_level: u16,
}

/// Mastering display colour volume (`mdcv`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MasteringDisplayColourVolume {
    pub display_primaries_x: [u16; 3],
    pub display_primaries_y: [u16; 3],
    pub white_point_x: u16,
    pub white_point_y: u16,
    pub max_display_mastering_luminance: u32,
    pub min_display_mastering_luminance: u32,
}

/// Pixel aspect ratio (`pasp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelAspectRatio {
    pub h_spacing: u32,
    pub v_spacing: u32,
}

impl Default for PixelAspectRatio {
    fn default() -> Self {
        Self {
            h_spacing: 1,
            v_spacing: 1,
        }
    }
}

/// TAI clock description (`taic`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaiClockInfo {
    pub time_uncertainty: u64,
    pub clock_resolution: u32,
    pub clock_drift_rate: i32,
    pub clock_type: u8,
}

impl Default for TaiClockInfo {
    fn default() -> Self {
        Self {
            time_uncertainty: u64::MAX, // unknown
            clock_resolution: 1,
            clock_drift_rate: i32::MAX, // unknown
            clock_type: 0,
        }
    }
}

/// A single TAI timestamp packet (`itai`), attached to images and sequence samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaiTimestamp {
    /// Nanoseconds since the TAI epoch.
    pub tai_timestamp: u64,
    pub synchronization_state: bool,
    pub timestamp_generation_failure: bool,
    pub timestamp_is_modified: bool,
}

//! Descriptive and transformative item properties stored under `ipco`.

use heif_bitstream::{BitstreamRange, StreamWriter};
use heif_image::{
    ColorProfile, ContentLightLevel, MasteringDisplayColourVolume, MirrorAxis, NclxColorProfile,
    PixelAspectRatio,
};

use crate::error::{Error, Result, Suberror};
use crate::fourcc::FourCC;
use crate::header::BoxHeader;
use crate::limits::SecurityLimits;

/// Image spatial extents (`ispe`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IspeBox {
    pub width: u32,
    pub height: u32,
}

impl IspeBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        Ok(Self {
            width: range.read_u32(),
            height: range.read_u32(),
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u32(self.width);
        w.write_u32(self.height);
    }
}

/// Colour information (`colr`): NCLX values or an ICC blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColrBox {
    pub profile: ColorProfile,
}

impl ColrBox {
    pub fn parse(range: &mut BitstreamRange<'_>, limits: &SecurityLimits) -> Result<Self> {
        let colour_type = FourCC(range.read_fixed::<4>());
        let profile = match colour_type {
            FourCC::NCLX => {
                let color_primaries = range.read_u16();
                let transfer_characteristics = range.read_u16();
                let matrix_coefficients = range.read_u16();
                let full_range = range.read_u8() & 0x80 != 0;
                ColorProfile::Nclx(NclxColorProfile {
                    color_primaries,
                    transfer_characteristics,
                    matrix_coefficients,
                    full_range,
                })
            }
            FourCC::RICC | FourCC::PROF => {
                let len = range.remaining();
                if len > limits.max_memory_block_size {
                    return Err(Error::limit("ICC profile exceeds the memory limit"));
                }
                let data = range.read_bytes(len as usize);
                if colour_type == FourCC::RICC {
                    ColorProfile::RestrictedIcc(data)
                } else {
                    ColorProfile::Icc(data)
                }
            }
            other => {
                return Err(Error::new(
                    crate::error::ErrorKind::ColorProfile,
                    Suberror::InvalidProperty,
                    format!("unknown colour type '{other}'"),
                ));
            }
        };
        Ok(Self { profile })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        match &self.profile {
            ColorProfile::Nclx(nclx) => {
                w.write_bytes(&FourCC::NCLX.0);
                w.write_u16(nclx.color_primaries);
                w.write_u16(nclx.transfer_characteristics);
                w.write_u16(nclx.matrix_coefficients);
                w.write_u8(if nclx.full_range { 0x80 } else { 0 });
            }
            ColorProfile::RestrictedIcc(data) => {
                w.write_bytes(&FourCC::RICC.0);
                w.write_bytes(data);
            }
            ColorProfile::Icc(data) => {
                w.write_bytes(&FourCC::PROF.0);
                w.write_bytes(data);
            }
        }
    }
}

/// Pixel information (`pixi`): bits per channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PixiBox {
    pub bits_per_channel: Vec<u8>,
}

impl PixiBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let count = range.read_u8();
        let mut bits_per_channel = Vec::with_capacity(count as usize);
        for _ in 0..count {
            bits_per_channel.push(range.read_u8());
        }
        Ok(Self { bits_per_channel })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u8(self.bits_per_channel.len() as u8);
        for &bits in &self.bits_per_channel {
            w.write_u8(bits);
        }
    }
}

/// Pixel aspect ratio (`pasp`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaspBox {
    pub ratio: PixelAspectRatio,
}

impl PaspBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        Ok(Self {
            ratio: PixelAspectRatio {
                h_spacing: range.read_u32(),
                v_spacing: range.read_u32(),
            },
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u32(self.ratio.h_spacing);
        w.write_u32(self.ratio.v_spacing);
    }
}

/// Content light level (`clli`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClliBox {
    pub clli: ContentLightLevel,
}

impl ClliBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        Ok(Self {
            clli: ContentLightLevel {
                max_content_light_level: range.read_u16(),
                max_pic_average_light_level: range.read_u16(),
            },
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u16(self.clli.max_content_light_level);
        w.write_u16(self.clli.max_pic_average_light_level);
    }
}

/// Mastering display colour volume (`mdcv`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MdcvBox {
    pub mdcv: MasteringDisplayColourVolume,
}

impl MdcvBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let mut mdcv = MasteringDisplayColourVolume::default();
        for i in 0..3 {
            mdcv.display_primaries_x[i] = range.read_u16();
            mdcv.display_primaries_y[i] = range.read_u16();
        }
        mdcv.white_point_x = range.read_u16();
        mdcv.white_point_y = range.read_u16();
        mdcv.max_display_mastering_luminance = range.read_u32();
        mdcv.min_display_mastering_luminance = range.read_u32();
        Ok(Self { mdcv })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        for i in 0..3 {
            w.write_u16(self.mdcv.display_primaries_x[i]);
            w.write_u16(self.mdcv.display_primaries_y[i]);
        }
        w.write_u16(self.mdcv.white_point_x);
        w.write_u16(self.mdcv.white_point_y);
        w.write_u32(self.mdcv.max_display_mastering_luminance);
        w.write_u32(self.mdcv.min_display_mastering_luminance);
    }
}

/// Auxiliary type property (`auxC`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuxCBox {
    pub aux_type: String,
    pub aux_subtypes: Vec<u8>,
}

pub const AUX_TYPE_ALPHA: &[&str] = &[
    "urn:mpeg:avc:2015:auxid:1",
    "urn:mpeg:hevc:2015:auxid:1",
    "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha",
];

pub const AUX_TYPE_DEPTH: &[&str] = &[
    "urn:mpeg:avc:2015:auxid:2",
    "urn:mpeg:hevc:2015:auxid:2",
    "urn:mpeg:mpegB:cicp:systems:auxiliary:depth",
];

impl AuxCBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let aux_type = range.read_nul_string();
        let mut aux_subtypes = Vec::new();
        while !range.eof() && !range.error() {
            aux_subtypes.push(range.read_u8());
        }
        Ok(Self {
            aux_type,
            aux_subtypes,
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_nul_string(&self.aux_type);
        w.write_bytes(&self.aux_subtypes);
    }

    pub fn is_alpha(&self) -> bool {
        AUX_TYPE_ALPHA.contains(&self.aux_type.as_str())
    }

    pub fn is_depth(&self) -> bool {
        AUX_TYPE_DEPTH.contains(&self.aux_type.as_str())
    }
}

/// Image rotation (`irot`): quarter turns counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrotBox {
    pub quarter_turns: u8,
}

impl IrotBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        Ok(Self {
            quarter_turns: range.read_u8() & 0x03,
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u8(self.quarter_turns & 0x03);
    }

    pub fn degrees_ccw(&self) -> u32 {
        self.quarter_turns as u32 * 90
    }
}

/// Image mirroring (`imir`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImirBox {
    pub axis: MirrorAxis,
}

impl ImirBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let axis = if range.read_u8() & 1 != 0 {
            MirrorAxis::Horizontal
        } else {
            MirrorAxis::Vertical
        };
        Ok(Self { axis })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u8(match self.axis {
            MirrorAxis::Vertical => 0,
            MirrorAxis::Horizontal => 1,
        });
    }
}

/// A signed rational, as stored in `clap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub numerator: i32,
    pub denominator: u32,
}

impl Fraction {
    fn checked(&self) -> bool {
        self.denominator != 0
    }

    /// Rounds half away from zero.
    fn round(num: i64, den: i64) -> i64 {
        debug_assert!(den > 0);
        if num >= 0 {
            (2 * num + den) / (2 * den)
        } else {
            -((-2 * num + den) / (2 * den))
        }
    }
}

/// Clean aperture (`clap`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClapBox {
    pub clean_aperture_width: Fraction,
    pub clean_aperture_height: Fraction,
    pub horizontal_offset: Fraction,
    pub vertical_offset: Fraction,
}

impl ClapBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let read_fraction = |range: &mut BitstreamRange<'_>| Fraction {
            numerator: range.read_i32(),
            denominator: range.read_u32(),
        };
        Ok(Self {
            clean_aperture_width: read_fraction(range),
            clean_aperture_height: read_fraction(range),
            horizontal_offset: read_fraction(range),
            vertical_offset: read_fraction(range),
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        for f in [
            self.clean_aperture_width,
            self.clean_aperture_height,
            self.horizontal_offset,
            self.vertical_offset,
        ] {
            w.write_i32(f.numerator);
            w.write_u32(f.denominator);
        }
    }

    /// Derives the inclusive crop window for an image of the given size.
    ///
    /// The picture center is `offset + (size - 1) / 2`; the window spans
    /// `± (clean_size - 1) / 2` around it, rounded half away from zero.
    pub fn crop_window(&self, image_width: u32, image_height: u32) -> Result<(i64, i64, i64, i64)> {
        for f in [
            self.clean_aperture_width,
            self.clean_aperture_height,
            self.horizontal_offset,
            self.vertical_offset,
        ] {
            if !f.checked() {
                return Err(Error::invalid_input(
                    Suberror::InvalidCleanAperture,
                    "clean aperture fraction with zero denominator",
                ));
            }
        }

        let axis = |offset: Fraction, clean: Fraction, size: u32| -> (i64, i64) {
            // All terms scaled by 2 * offset.den * clean.den to stay in integers.
            let od = offset.denominator as i64;
            let cd = clean.denominator as i64;
            let den = 2 * od * cd;
            let center = 2 * offset.numerator as i64 * cd + (size as i64 - 1) * od * cd;
            let half = (clean.numerator as i64 - cd) * od;
            let low = Fraction::round(center - half, den);
            let high = Fraction::round(center + half, den);
            (low, high)
        };

        let (left, right) = axis(
            self.horizontal_offset,
            self.clean_aperture_width,
            image_width,
        );
        let (top, bottom) = axis(
            self.vertical_offset,
            self.clean_aperture_height,
            image_height,
        );
        Ok((left, right, top, bottom))
    }
}

/// One component declared by `cmpd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmpdComponent {
    pub component_type: u16,
    /// Set when `component_type >= 0x8000`.
    pub component_type_uri: Option<String>,
}

/// Component definition box (`cmpd`), ISO/IEC 23001-17.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CmpdBox {
    pub components: Vec<CmpdComponent>,
}

pub mod component_type {
    pub const MONOCHROME: u16 = 0;
    pub const Y: u16 = 1;
    pub const CB: u16 = 2;
    pub const CR: u16 = 3;
    pub const RED: u16 = 4;
    pub const GREEN: u16 = 5;
    pub const BLUE: u16 = 6;
    pub const ALPHA: u16 = 7;
}

impl CmpdBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let count = range.read_u16();
        let mut components = Vec::new();
        for _ in 0..count {
            if range.eof() || range.error() {
                break;
            }
            let component_type = range.read_u16();
            let component_type_uri = if component_type >= 0x8000 {
                Some(range.read_nul_string())
            } else {
                None
            };
            components.push(CmpdComponent {
                component_type,
                component_type_uri,
            });
        }
        Ok(Self { components })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u16(self.components.len() as u16);
        for component in &self.components {
            w.write_u16(component.component_type);
            if component.component_type >= 0x8000 {
                w.write_nul_string(component.component_type_uri.as_deref().unwrap_or(""));
            }
        }
    }
}

/// Per-component layout declared by `uncC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UncCComponent {
    pub component_index: u16,
    pub bit_depth_minus_one: u8,
    pub format: u8,
    pub align_size: u8,
}

/// Uncompressed frame configuration box (`uncC`), ISO/IEC 23001-17.
///
/// Version 1 carries only the profile; version 0 spells out the full layout. The decodable
/// subset is gated separately in the uncompressed decoder, not here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UncCBox {
    pub version: u8,
    pub profile: u32,
    pub components: Vec<UncCComponent>,
    pub sampling_type: u8,
    pub interleave_type: u8,
    pub block_size: u8,
    pub components_little_endian: bool,
    pub block_pad_lsb: bool,
    pub block_little_endian: bool,
    pub block_reversed: bool,
    pub pad_unknown: bool,
    pub pixel_size: u32,
    pub row_align_size: u32,
    pub tile_align_size: u32,
    pub num_tile_cols_minus_one: u32,
    pub num_tile_rows_minus_one: u32,
}

impl UncCBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 1)?;
        let version = header.version();
        let mut unc = UncCBox {
            version,
            profile: range.read_u32(),
            ..Default::default()
        };
        if version == 1 {
            // Profile-only form; everything else is implied by the profile.
            return Ok(unc);
        }

        let count = range.read_u32();
        for _ in 0..count {
            if range.eof() || range.error() {
                break;
            }
            unc.components.push(UncCComponent {
                component_index: range.read_u16(),
                bit_depth_minus_one: range.read_u8(),
                format: range.read_u8(),
                align_size: range.read_u8(),
            });
        }

        unc.sampling_type = range.read_u8();
        unc.interleave_type = range.read_u8();
        unc.block_size = range.read_u8();
        let flags = range.read_u8();
        unc.components_little_endian = flags & 0x80 != 0;
        unc.block_pad_lsb = flags & 0x40 != 0;
        unc.block_little_endian = flags & 0x20 != 0;
        unc.block_reversed = flags & 0x10 != 0;
        unc.pad_unknown = flags & 0x08 != 0;
        unc.pixel_size = range.read_u32();
        unc.row_align_size = range.read_u32();
        unc.tile_align_size = range.read_u32();
        unc.num_tile_cols_minus_one = range.read_u32();
        unc.num_tile_rows_minus_one = range.read_u32();
        Ok(unc)
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u32(self.profile);
        if self.version == 1 {
            return;
        }
        self.write_v0_tail(w);
    }

    fn write_v0_tail(&self, w: &mut StreamWriter) {
        w.write_u32(self.components.len() as u32);
        for component in &self.components {
            w.write_u16(component.component_index);
            w.write_u8(component.bit_depth_minus_one);
            w.write_u8(component.format);
            w.write_u8(component.align_size);
        }
        w.write_u8(self.sampling_type);
        w.write_u8(self.interleave_type);
        w.write_u8(self.block_size);
        let mut flags = 0u8;
        if self.components_little_endian {
            flags |= 0x80;
        }
        if self.block_pad_lsb {
            flags |= 0x40;
        }
        if self.block_little_endian {
            flags |= 0x20;
        }
        if self.block_reversed {
            flags |= 0x10;
        }
        if self.pad_unknown {
            flags |= 0x08;
        }
        w.write_u8(flags);
        w.write_u32(self.pixel_size);
        w.write_u32(self.row_align_size);
        w.write_u32(self.tile_align_size);
        w.write_u32(self.num_tile_cols_minus_one);
        w.write_u32(self.num_tile_rows_minus_one);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heif_bitstream::{BitstreamRange, MemorySource, SourceCursor};

    fn fraction(numerator: i32, denominator: u32) -> Fraction {
        Fraction {
            numerator,
            denominator,
        }
    }

    #[test]
    fn clap_centered_window() {
        // A centered 4x2 aperture in an 8x4 picture.
        let clap = ClapBox {
            clean_aperture_width: fraction(4, 1),
            clean_aperture_height: fraction(2, 1),
            horizontal_offset: fraction(0, 1),
            vertical_offset: fraction(0, 1),
        };
        let (left, right, top, bottom) = clap.crop_window(8, 4).unwrap();
        assert_eq!((left, right), (2, 5));
        assert_eq!((top, bottom), (1, 2));
    }

    #[test]
    fn clap_offset_rounds_half_away_from_zero() {
        // Offset of -1/2 shifts the center half a pixel; rounding goes away from zero.
        let clap = ClapBox {
            clean_aperture_width: fraction(2, 1),
            clean_aperture_height: fraction(2, 1),
            horizontal_offset: fraction(-1, 2),
            vertical_offset: fraction(0, 1),
        };
        let (left, right, _, _) = clap.crop_window(4, 4).unwrap();
        // Center x = -1/2 + 3/2 = 1; window = 1 +- 1/2 -> rounds to [1, 2].
        assert_eq!((left, right), (1, 2));
    }

    #[test]
    fn clap_rejects_zero_denominator() {
        let clap = ClapBox {
            clean_aperture_width: fraction(4, 0),
            clean_aperture_height: fraction(2, 1),
            horizontal_offset: fraction(0, 1),
            vertical_offset: fraction(0, 1),
        };
        assert!(clap.crop_window(8, 4).is_err());
    }

    #[test]
    fn colr_nclx_roundtrip() {
        let colr = ColrBox {
            profile: ColorProfile::Nclx(NclxColorProfile {
                color_primaries: 9,
                transfer_characteristics: 16,
                matrix_coefficients: 9,
                full_range: false,
            }),
        };
        let mut w = heif_bitstream::StreamWriter::new();
        colr.write(&mut w);
        let bytes = w.into_data();

        let source = MemorySource::new(bytes.clone());
        let mut cursor = SourceCursor::new(&source);
        let mut range = BitstreamRange::new(&mut cursor, bytes.len() as u64);
        let parsed = ColrBox::parse(&mut range, &SecurityLimits::default()).unwrap();
        assert_eq!(parsed, colr);
    }

    #[test]
    fn colr_icc_passthrough() {
        let colr = ColrBox {
            profile: ColorProfile::RestrictedIcc(vec![1, 2, 3, 4, 5]),
        };
        let mut w = heif_bitstream::StreamWriter::new();
        colr.write(&mut w);
        let bytes = w.into_data();

        let source = MemorySource::new(bytes.clone());
        let mut cursor = SourceCursor::new(&source);
        let mut range = BitstreamRange::new(&mut cursor, bytes.len() as u64);
        let parsed = ColrBox::parse(&mut range, &SecurityLimits::default()).unwrap();
        assert_eq!(parsed, colr);
    }
}

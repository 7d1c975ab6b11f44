//! Codec configuration properties: `hvcC`, `av1C` and `vvcC`.

use heif_bitstream::{BitstreamRange, StreamWriter};

use crate::error::{Error, Result};
use crate::header::BoxHeader;
use crate::limits::SecurityLimits;

/// One array of parameter-set NAL units inside `hvcC`/`vvcC`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NalArray {
    pub array_completeness: bool,
    pub nal_unit_type: u8,
    pub nal_units: Vec<Vec<u8>>,
}

/// HEVC decoder configuration record (`hvcC`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HvcCBox {
    pub configuration_version: u8,
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: [u8; 6],
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format: u8,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
    /// NAL length prefix size in bytes (1..=4).
    pub length_size: u8,
    pub nal_arrays: Vec<NalArray>,
}

impl Default for HvcCBox {
    fn default() -> Self {
        Self {
            configuration_version: 1,
            general_profile_space: 0,
            general_tier_flag: false,
            general_profile_idc: 0,
            general_profile_compatibility_flags: 0,
            general_constraint_indicator_flags: [0; 6],
            general_level_idc: 0,
            min_spatial_segmentation_idc: 0,
            parallelism_type: 0,
            chroma_format: 1,
            bit_depth_luma: 8,
            bit_depth_chroma: 8,
            avg_frame_rate: 0,
            constant_frame_rate: 0,
            num_temporal_layers: 1,
            temporal_id_nested: false,
            length_size: 4,
            nal_arrays: Vec::new(),
        }
    }
}

impl HvcCBox {
    pub fn parse(range: &mut BitstreamRange<'_>, limits: &SecurityLimits) -> Result<Self> {
        let mut c = HvcCBox::default();

        c.configuration_version = range.read_u8();
        let byte = range.read_u8();
        c.general_profile_space = (byte >> 6) & 0x3;
        c.general_tier_flag = (byte >> 5) & 1 != 0;
        c.general_profile_idc = byte & 0x1f;
        c.general_profile_compatibility_flags = range.read_u32();
        c.general_constraint_indicator_flags = range.read_fixed::<6>();
        c.general_level_idc = range.read_u8();
        c.min_spatial_segmentation_idc = range.read_u16() & 0x0fff;
        c.parallelism_type = range.read_u8() & 0x03;
        c.chroma_format = range.read_u8() & 0x03;
        c.bit_depth_luma = (range.read_u8() & 0x07) + 8;
        c.bit_depth_chroma = (range.read_u8() & 0x07) + 8;
        c.avg_frame_rate = range.read_u16();

        let byte = range.read_u8();
        c.constant_frame_rate = (byte >> 6) & 0x03;
        c.num_temporal_layers = (byte >> 3) & 0x07;
        c.temporal_id_nested = (byte >> 2) & 1 != 0;
        c.length_size = (byte & 0x03) + 1;

        let num_arrays = range.read_u8();
        for _ in 0..num_arrays {
            if range.error() {
                break;
            }
            let byte = range.read_u8();
            let mut array = NalArray {
                array_completeness: (byte >> 6) & 1 != 0,
                nal_unit_type: byte & 0x3f,
                nal_units: Vec::new(),
            };
            let num_units = range.read_u16();
            for _ in 0..num_units {
                if range.error() {
                    break;
                }
                let size = range.read_u16() as u64;
                if size == 0 {
                    continue;
                }
                if size > limits.max_memory_block_size {
                    return Err(Error::limit("hvcC NAL unit exceeds the memory limit"));
                }
                array.nal_units.push(range.read_bytes(size as usize));
            }
            c.nal_arrays.push(array);
        }

        range.skip_to_end();
        Ok(c)
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u8(self.configuration_version);
        w.write_u8(
            ((self.general_profile_space & 0x3) << 6)
                | (u8::from(self.general_tier_flag) << 5)
                | (self.general_profile_idc & 0x1f),
        );
        w.write_u32(self.general_profile_compatibility_flags);
        w.write_bytes(&self.general_constraint_indicator_flags);
        w.write_u8(self.general_level_idc);
        w.write_u16(self.min_spatial_segmentation_idc & 0x0fff);
        w.write_u8(self.parallelism_type | 0xfc);
        w.write_u8(self.chroma_format | 0xfc);
        w.write_u8((self.bit_depth_luma - 8) | 0xf8);
        w.write_u8((self.bit_depth_chroma - 8) | 0xf8);
        w.write_u16(self.avg_frame_rate);
        w.write_u8(
            ((self.constant_frame_rate & 0x03) << 6)
                | ((self.num_temporal_layers & 0x07) << 3)
                | (u8::from(self.temporal_id_nested) << 2)
                | ((self.length_size - 1) & 0x03),
        );
        w.write_u8(self.nal_arrays.len() as u8);
        for array in &self.nal_arrays {
            w.write_u8((u8::from(array.array_completeness) << 6) | (array.nal_unit_type & 0x3f));
            w.write_u16(array.nal_units.len() as u16);
            for unit in &array.nal_units {
                w.write_u16(unit.len() as u16);
                w.write_bytes(unit);
            }
        }
    }

    /// Appends a parameter-set NAL unit, deriving the NAL type from its header byte.
    pub fn append_nal(&mut self, nal: &[u8]) {
        if nal.is_empty() {
            return;
        }
        let nal_unit_type = nal[0] >> 1;
        self.nal_arrays.push(NalArray {
            array_completeness: false,
            nal_unit_type,
            nal_units: vec![nal.to_vec()],
        });
    }

    /// All parameter-set NAL units with 4-byte length prefixes, for handing to a decoder.
    pub fn header_nals(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for array in &self.nal_arrays {
            for unit in &array.nal_units {
                out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
                out.extend_from_slice(unit);
            }
        }
        out
    }
}

/// AV1 codec configuration record (`av1C`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Av1CBox {
    pub seq_profile: u8,
    pub seq_level_idx_0: u8,
    pub seq_tier_0: bool,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub monochrome: bool,
    pub chroma_subsampling_x: bool,
    pub chroma_subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub initial_presentation_delay: Option<u8>,
    pub config_obus: Vec<u8>,
}

impl Default for Av1CBox {
    fn default() -> Self {
        Self {
            seq_profile: 0,
            seq_level_idx_0: 0,
            seq_tier_0: false,
            high_bitdepth: false,
            twelve_bit: false,
            monochrome: false,
            chroma_subsampling_x: true,
            chroma_subsampling_y: true,
            chroma_sample_position: 0,
            initial_presentation_delay: None,
            config_obus: Vec::new(),
        }
    }
}

impl Av1CBox {
    pub fn parse(range: &mut BitstreamRange<'_>, limits: &SecurityLimits) -> Result<Self> {
        let byte = range.read_u8();
        let marker = byte >> 7;
        let version = byte & 0x7f;
        if marker != 1 || version != 1 {
            return Err(Error::parse(format!(
                "av1C marker/version {marker}/{version} is not supported"
            )));
        }

        let byte = range.read_u8();
        let seq_profile = byte >> 5;
        let seq_level_idx_0 = byte & 0x1f;

        let byte = range.read_u8();
        let seq_tier_0 = byte & 0x80 != 0;
        let high_bitdepth = byte & 0x40 != 0;
        let twelve_bit = byte & 0x20 != 0;
        let monochrome = byte & 0x10 != 0;
        let chroma_subsampling_x = byte & 0x08 != 0;
        let chroma_subsampling_y = byte & 0x04 != 0;
        let chroma_sample_position = byte & 0x03;

        let byte = range.read_u8();
        let initial_presentation_delay = if byte & 0x10 != 0 {
            Some((byte & 0x0f) + 1)
        } else {
            None
        };

        let rest = range.remaining();
        if rest > limits.max_memory_block_size {
            return Err(Error::limit("av1C config OBUs exceed the memory limit"));
        }
        let config_obus = range.read_bytes(rest as usize);

        Ok(Self {
            seq_profile,
            seq_level_idx_0,
            seq_tier_0,
            high_bitdepth,
            twelve_bit,
            monochrome,
            chroma_subsampling_x,
            chroma_subsampling_y,
            chroma_sample_position,
            initial_presentation_delay,
            config_obus,
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u8(0x81); // marker + version 1
        w.write_u8((self.seq_profile << 5) | (self.seq_level_idx_0 & 0x1f));
        w.write_u8(
            (u8::from(self.seq_tier_0) << 7)
                | (u8::from(self.high_bitdepth) << 6)
                | (u8::from(self.twelve_bit) << 5)
                | (u8::from(self.monochrome) << 4)
                | (u8::from(self.chroma_subsampling_x) << 3)
                | (u8::from(self.chroma_subsampling_y) << 2)
                | (self.chroma_sample_position & 0x03),
        );
        match self.initial_presentation_delay {
            Some(delay) => w.write_u8(0x10 | ((delay - 1) & 0x0f)),
            None => w.write_u8(0),
        }
        w.write_bytes(&self.config_obus);
    }
}

/// VVC decoder configuration record (`vvcC`).
///
/// When the profile-tier-level record is present, everything from it onward is kept as opaque
/// bytes: the record's layout varies and decoders take the raw configuration anyway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VvcCBox {
    /// NAL length prefix size in bytes (1..=4).
    pub length_size: u8,
    pub ptl_present: bool,
    pub nal_arrays: Vec<NalArray>,
    pub raw_remainder: Vec<u8>,
}

impl Default for VvcCBox {
    fn default() -> Self {
        Self {
            length_size: 4,
            ptl_present: false,
            nal_arrays: Vec::new(),
            raw_remainder: Vec::new(),
        }
    }
}

impl VvcCBox {
    pub fn parse(
        range: &mut BitstreamRange<'_>,
        header: &mut BoxHeader,
        limits: &SecurityLimits,
    ) -> Result<Self> {
        header.read_full_checked(range, 0)?;

        let byte = range.read_u8();
        let length_size = ((byte >> 1) & 0x03) + 1;
        let ptl_present = byte & 1 != 0;

        let mut vvcc = VvcCBox {
            length_size,
            ptl_present,
            ..Default::default()
        };

        if ptl_present {
            let rest = range.remaining();
            if rest > limits.max_memory_block_size {
                return Err(Error::limit("vvcC record exceeds the memory limit"));
            }
            vvcc.raw_remainder = range.read_bytes(rest as usize);
            return Ok(vvcc);
        }

        let num_arrays = range.read_u8();
        for _ in 0..num_arrays {
            if range.error() {
                break;
            }
            let byte = range.read_u8();
            let mut array = NalArray {
                array_completeness: (byte >> 7) & 1 != 0,
                nal_unit_type: byte & 0x1f,
                nal_units: Vec::new(),
            };
            let num_units = range.read_u16();
            for _ in 0..num_units {
                if range.error() {
                    break;
                }
                let size = range.read_u16() as usize;
                if size == 0 {
                    continue;
                }
                array.nal_units.push(range.read_bytes(size));
            }
            vvcc.nal_arrays.push(array);
        }

        range.skip_to_end();
        Ok(vvcc)
    }

    /// All parameter-set NAL units with 4-byte length prefixes, for handing to a decoder.
    pub fn header_nals(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for array in &self.nal_arrays {
            for unit in &array.nal_units {
                out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
                out.extend_from_slice(unit);
            }
        }
        out
    }

    pub fn write(&self, w: &mut StreamWriter) {
        let byte = 0xf8 | (((self.length_size - 1) & 0x03) << 1) | u8::from(self.ptl_present);
        w.write_u8(byte);
        if self.ptl_present {
            w.write_bytes(&self.raw_remainder);
            return;
        }
        w.write_u8(self.nal_arrays.len() as u8);
        for array in &self.nal_arrays {
            w.write_u8((u8::from(array.array_completeness) << 7) | (array.nal_unit_type & 0x1f));
            w.write_u16(array.nal_units.len() as u16);
            for unit in &array.nal_units {
                w.write_u16(unit.len() as u16);
                w.write_bytes(unit);
            }
        }
    }
}

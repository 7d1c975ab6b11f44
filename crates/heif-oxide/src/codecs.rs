//! The codec-plugin contract.
//!
//! The box layer does not compress or decompress anything itself. Decoders and encoders are
//! trait objects registered on the context; this module defines their shape and the bitstream
//! plumbing between the container and the plugins (NAL length-prefix conversion, parameter-set
//! extraction, configuration synthesis).

use std::sync::Arc;

use heif_bitstream::BitReader;
use heif_bmff::boxes::HvcCBox;
use heif_bmff::{Error, ErrorKind, FourCC, Result, Suberror};
use heif_image::{Chroma, Colorspace, PixelImage};

/// Compression formats the container knows how to wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompressionFormat {
    Hevc,
    Av1,
    Jpeg,
    Jpeg2000,
    Vvc,
    Uncompressed,
}

impl CompressionFormat {
    /// Maps a coded-image item type to its compression format.
    pub fn from_item_type(item_type: FourCC) -> Option<Self> {
        match item_type {
            FourCC::HVC1 | FourCC::HEV1 => Some(Self::Hevc),
            FourCC::AV01 => Some(Self::Av1),
            FourCC::JPEG => Some(Self::Jpeg),
            FourCC::J2K1 => Some(Self::Jpeg2000),
            FourCC::VVC1 => Some(Self::Vvc),
            FourCC::UNCI => Some(Self::Uncompressed),
            _ => None,
        }
    }

    /// The item type written into `infe` for this format.
    pub fn item_type(self) -> FourCC {
        match self {
            Self::Hevc => FourCC::HVC1,
            Self::Av1 => FourCC::AV01,
            Self::Jpeg => FourCC::JPEG,
            Self::Jpeg2000 => FourCC::J2K1,
            Self::Vvc => FourCC::VVC1,
            Self::Uncompressed => FourCC::UNCI,
        }
    }

    /// The sample-entry type written into `stsd` for sequence tracks of this format.
    pub fn sample_entry_type(self) -> FourCC {
        match self {
            Self::Hevc => FourCC::HVC1,
            Self::Av1 => FourCC::AV01,
            Self::Jpeg => FourCC::JPEG,
            Self::Jpeg2000 => FourCC::J2KI,
            Self::Vvc => FourCC::VVC1,
            Self::Uncompressed => FourCC::UNCI,
        }
    }

    pub fn from_sample_entry_type(fourcc: FourCC) -> Option<Self> {
        match fourcc {
            FourCC::HVC1 | FourCC::HEV1 => Some(Self::Hevc),
            FourCC::AV01 => Some(Self::Av1),
            FourCC::JPEG => Some(Self::Jpeg),
            FourCC::J2KI => Some(Self::Jpeg2000),
            FourCC::VVC1 => Some(Self::Vvc),
            FourCC::UNCI => Some(Self::Uncompressed),
            _ => None,
        }
    }
}

/// One decoder instance. Created per item or per chunk, fed configuration bytes first and then
/// payload bytes, then asked for the image.
pub trait ImageDecoder {
    fn push_data(&mut self, data: &[u8]) -> Result<()>;

    fn decode_image(&mut self) -> Result<PixelImage>;

    fn set_strict_decoding(&mut self, _strict: bool) {}

    /// Whether this decoder wants Annex-B start codes instead of length-prefixed NAL units.
    /// Only meaningful for HEVC and VVC payloads.
    fn needs_start_codes(&self) -> bool {
        false
    }
}

/// Factory for [`ImageDecoder`] instances, registered on the context.
pub trait DecoderPlugin: Send + Sync {
    fn format(&self) -> CompressionFormat;

    fn new_decoder(&self) -> Box<dyn ImageDecoder>;
}

/// One encoder instance.
///
/// `encode_image` returns the raw codec bitstream: Annex-B for HEVC/VVC, a plain OBU sequence
/// for AV1, the full codestream for JPEG and JPEG 2000. The container splits out parameter
/// sets and synthesizes the configuration property itself.
pub trait ImageEncoder {
    fn format(&self) -> CompressionFormat;

    /// The colorspace/chroma the encoder wants its input in. The caller converts, or fails
    /// with a usage error when it cannot.
    fn query_input_colorspace(
        &self,
        colorspace: Colorspace,
        chroma: Chroma,
    ) -> (Colorspace, Chroma) {
        (colorspace, chroma)
    }

    /// The coded size for a given input size (codecs may round up to block sizes).
    fn query_encoded_size(&self, width: u32, height: u32) -> (u32, u32) {
        (width, height)
    }

    fn encode_image(&mut self, image: &PixelImage) -> Result<Vec<u8>>;
}

/// Factory for [`ImageEncoder`] instances.
pub trait EncoderPlugin: Send + Sync {
    fn format(&self) -> CompressionFormat;

    fn new_encoder(&self) -> Box<dyn ImageEncoder>;
}

/// Explicit plugin registry owned by the context. There is no process-global plugin state.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    decoders: Vec<Arc<dyn DecoderPlugin>>,
    encoders: Vec<Arc<dyn EncoderPlugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field(
                "decoders",
                &self.decoders.iter().map(|d| d.format()).collect::<Vec<_>>(),
            )
            .field(
                "encoders",
                &self.encoders.iter().map(|e| e.format()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_decoder(&mut self, plugin: Arc<dyn DecoderPlugin>) {
        self.decoders.push(plugin);
    }

    pub fn register_encoder(&mut self, plugin: Arc<dyn EncoderPlugin>) {
        self.encoders.push(plugin);
    }

    pub fn decoder_for(&self, format: CompressionFormat) -> Result<Box<dyn ImageDecoder>> {
        self.decoders
            .iter()
            .find(|p| p.format() == format)
            .map(|p| p.new_decoder())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Unsupported,
                    Suberror::UnsupportedCodec,
                    format!("no decoder registered for {format:?}"),
                )
            })
    }

    pub fn encoder_for(&self, format: CompressionFormat) -> Result<Box<dyn ImageEncoder>> {
        self.encoders
            .iter()
            .find(|p| p.format() == format)
            .map(|p| p.new_encoder())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::Unsupported,
                    Suberror::UnsupportedCodec,
                    format!("no encoder registered for {format:?}"),
                )
            })
    }
}

// --- NAL unit plumbing ---

/// Splits an Annex-B stream (3- or 4-byte start codes) into NAL units.
pub fn split_annexb_nals(data: &[u8]) -> Vec<&[u8]> {
    let mut nals = Vec::new();
    let mut pos = 0usize;
    let mut start = None;

    while pos + 2 < data.len() {
        if data[pos] == 0 && data[pos + 1] == 0 && data[pos + 2] == 1 {
            let code_start = if pos > 0 && data[pos - 1] == 0 {
                pos - 1
            } else {
                pos
            };
            if let Some(s) = start {
                nals.push(&data[s..code_start]);
            }
            start = Some(pos + 3);
            pos += 3;
        } else {
            pos += 1;
        }
    }
    if let Some(s) = start {
        nals.push(&data[s..]);
    }
    nals
}

/// Converts a length-prefixed NAL stream to Annex-B start-code format.
pub fn length_prefixed_to_annexb(data: &[u8], length_size: u8) -> Result<Vec<u8>> {
    let length_size = length_size as usize;
    if !(1..=4).contains(&length_size) {
        return Err(Error::parse("NAL length prefix size out of range"));
    }
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut pos = 0usize;
    while pos < data.len() {
        if pos + length_size > data.len() {
            return Err(Error::truncated("truncated NAL length prefix"));
        }
        let mut len = 0usize;
        for &b in &data[pos..pos + length_size] {
            len = (len << 8) | b as usize;
        }
        pos += length_size;
        if pos + len > data.len() {
            return Err(Error::truncated("NAL unit extends past its buffer"));
        }
        out.extend_from_slice(&[0, 0, 1]);
        out.extend_from_slice(&data[pos..pos + len]);
        pos += len;
    }
    Ok(out)
}

/// Prefixes each NAL unit with a 4-byte big-endian length.
pub fn nals_to_length_prefixed(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}

const HEVC_NAL_VPS: u8 = 32;
const HEVC_NAL_SPS: u8 = 33;
const HEVC_NAL_PPS: u8 = 34;

pub fn hevc_nal_type(nal: &[u8]) -> u8 {
    if nal.is_empty() {
        return 0xff;
    }
    (nal[0] >> 1) & 0x3f
}

pub fn is_hevc_parameter_set(nal: &[u8]) -> bool {
    matches!(
        hevc_nal_type(nal),
        HEVC_NAL_VPS | HEVC_NAL_SPS | HEVC_NAL_PPS
    )
}

/// Strips emulation-prevention bytes (00 00 03 -> 00 00) from a NAL payload.
fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0u32;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// The handful of SPS fields needed to fill an `hvcC` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcSpsSummary {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: [u8; 6],
    pub general_level_idc: u8,
    pub chroma_format_idc: u8,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
}

/// Parses the leading fields of an HEVC SPS NAL unit.
pub fn parse_hevc_sps(nal: &[u8]) -> Result<HevcSpsSummary> {
    if nal.len() < 4 || hevc_nal_type(nal) != HEVC_NAL_SPS {
        return Err(Error::parse("not an HEVC SPS NAL unit"));
    }
    let rbsp = strip_emulation_prevention(&nal[2..]);
    let mut r = BitReader::new(&rbsp);

    let err = |_| Error::truncated("SPS ends prematurely");

    r.skip_bits(4).map_err(err)?; // sps_video_parameter_set_id
    let max_sub_layers_minus1 = r.get_bits(3).map_err(err)?;
    r.skip_bits(1).map_err(err)?; // sps_temporal_id_nesting_flag

    // profile_tier_level
    let general_profile_space = r.get_bits(2).map_err(err)? as u8;
    let general_tier_flag = r.get_flag().map_err(err)?;
    let general_profile_idc = r.get_bits(5).map_err(err)? as u8;
    let general_profile_compatibility_flags = r.get_bits(32).map_err(err)?;
    let mut general_constraint_indicator_flags = [0u8; 6];
    for byte in &mut general_constraint_indicator_flags {
        *byte = r.get_bits(8).map_err(err)? as u8;
    }
    let general_level_idc = r.get_bits(8).map_err(err)? as u8;

    // Sub-layer profile/level presence flags plus alignment.
    if max_sub_layers_minus1 > 0 {
        let mut sub_layer_profile = [false; 8];
        let mut sub_layer_level = [false; 8];
        for i in 0..max_sub_layers_minus1 as usize {
            sub_layer_profile[i] = r.get_flag().map_err(err)?;
            sub_layer_level[i] = r.get_flag().map_err(err)?;
        }
        r.skip_bits((8 - max_sub_layers_minus1) * 2).map_err(err)?;
        for i in 0..max_sub_layers_minus1 as usize {
            if sub_layer_profile[i] {
                r.skip_bits(2 + 1 + 5 + 32 + 48).map_err(err)?;
            }
            if sub_layer_level[i] {
                r.skip_bits(8).map_err(err)?;
            }
        }
    }

    let uvlc_err = |_| Error::parse("invalid Exp-Golomb code in SPS");
    let _sps_seq_parameter_set_id = r.get_uvlc().map_err(uvlc_err)?;
    let chroma_format_idc = r.get_uvlc().map_err(uvlc_err)? as u8;
    if chroma_format_idc == 3 {
        r.skip_bits(1).map_err(err)?; // separate_colour_plane_flag
    }
    let pic_width_in_luma_samples = r.get_uvlc().map_err(uvlc_err)?;
    let pic_height_in_luma_samples = r.get_uvlc().map_err(uvlc_err)?;
    let conformance_window_flag = r.get_flag().map_err(err)?;
    if conformance_window_flag {
        for _ in 0..4 {
            r.get_uvlc().map_err(uvlc_err)?;
        }
    }
    let bit_depth_luma = r.get_uvlc().map_err(uvlc_err)? as u8 + 8;
    let bit_depth_chroma = r.get_uvlc().map_err(uvlc_err)? as u8 + 8;

    Ok(HevcSpsSummary {
        general_profile_space,
        general_tier_flag,
        general_profile_idc,
        general_profile_compatibility_flags,
        general_constraint_indicator_flags,
        general_level_idc,
        chroma_format_idc,
        pic_width_in_luma_samples,
        pic_height_in_luma_samples,
        bit_depth_luma,
        bit_depth_chroma,
    })
}

/// Builds an `hvcC` property from an Annex-B encoder output, returning the box and the
/// non-parameter-set payload NAL units.
pub fn synthesize_hvcc(bitstream: &[u8]) -> Result<(HvcCBox, Vec<u8>)> {
    let nals = split_annexb_nals(bitstream);
    if nals.is_empty() {
        return Err(Error::new(
            ErrorKind::EncoderPlugin,
            Suberror::Unspecified,
            "encoder produced no NAL units",
        ));
    }

    let mut hvcc = HvcCBox::default();
    let mut payload_nals: Vec<&[u8]> = Vec::new();
    let mut sps_seen = false;

    for nal in nals {
        if is_hevc_parameter_set(nal) {
            if hevc_nal_type(nal) == HEVC_NAL_SPS && !sps_seen {
                let sps = parse_hevc_sps(nal)?;
                hvcc.general_profile_space = sps.general_profile_space;
                hvcc.general_tier_flag = sps.general_tier_flag;
                hvcc.general_profile_idc = sps.general_profile_idc;
                hvcc.general_profile_compatibility_flags =
                    sps.general_profile_compatibility_flags;
                hvcc.general_constraint_indicator_flags =
                    sps.general_constraint_indicator_flags;
                hvcc.general_level_idc = sps.general_level_idc;
                hvcc.chroma_format = sps.chroma_format_idc;
                hvcc.bit_depth_luma = sps.bit_depth_luma;
                hvcc.bit_depth_chroma = sps.bit_depth_chroma;
                sps_seen = true;
            }
            hvcc.append_nal(nal);
        } else {
            payload_nals.push(nal);
        }
    }

    if !sps_seen {
        return Err(Error::new(
            ErrorKind::EncoderPlugin,
            Suberror::Unspecified,
            "encoder bitstream carries no SPS",
        ));
    }

    Ok((hvcc, nals_to_length_prefixed(&payload_nals)))
}

// --- AV1 OBU plumbing ---

const OBU_SEQUENCE_HEADER: u8 = 1;

fn read_leb128(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    for i in 0..8 {
        let &byte = data.get(*pos)?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << (i * 7);
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

/// Extracts the sequence-header OBU (with its header) from an AV1 bitstream, for `av1C`.
pub fn extract_av1_sequence_header(data: &[u8]) -> Option<Vec<u8>> {
    let mut pos = 0usize;
    while pos < data.len() {
        let start = pos;
        let header = data[pos];
        if header & 0x80 != 0 {
            return None; // forbidden bit
        }
        let obu_type = (header >> 3) & 0x0f;
        let has_extension = header & 0x04 != 0;
        let has_size = header & 0x02 != 0;
        pos += 1;
        if has_extension {
            pos += 1;
        }
        let size = if has_size {
            read_leb128(data, &mut pos)? as usize
        } else {
            data.len() - pos
        };
        if pos + size > data.len() {
            return None;
        }
        pos += size;
        if obu_type == OBU_SEQUENCE_HEADER {
            return Some(data[start..pos].to_vec());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annexb_split() {
        let data = [0u8, 0, 0, 1, 0x40, 1, 2, 0, 0, 1, 0x42, 9, 0, 0, 0, 1, 0x26, 7];
        let nals = split_annexb_nals(&data);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0], &[0x40, 1, 2]);
        assert_eq!(nals[1], &[0x42, 9]);
        assert_eq!(nals[2], &[0x26, 7]);
    }

    #[test]
    fn length_prefix_conversion() {
        let data = [0u8, 0, 0, 2, 0x40, 1, 0, 0, 0, 1, 0x26];
        let annexb = length_prefixed_to_annexb(&data, 4).unwrap();
        assert_eq!(annexb, vec![0, 0, 1, 0x40, 1, 0, 0, 1, 0x26]);

        let nals = split_annexb_nals(&annexb);
        let back = nals_to_length_prefixed(&nals);
        assert_eq!(back, data);
    }

    #[test]
    fn nal_types() {
        // SPS NAL header: type 33 -> first byte (33 << 1).
        assert_eq!(hevc_nal_type(&[33 << 1, 0]), 33);
        assert!(is_hevc_parameter_set(&[32 << 1, 0]));
        assert!(is_hevc_parameter_set(&[34 << 1, 0]));
        assert!(!is_hevc_parameter_set(&[19 << 1, 0]));
    }

    #[test]
    fn emulation_prevention() {
        assert_eq!(
            strip_emulation_prevention(&[0, 0, 3, 1, 0, 0, 3, 0]),
            vec![0, 0, 1, 0, 0, 0]
        );
    }
}

//! Stub codec plugins for container tests.
//!
//! The container treats codecs as external collaborators, so the tests stand in a pair of
//! deterministic plugins: a "jpeg" one that stores the raw planes as its codestream, and an
//! "HEVC" one that wraps the same payload in Annex-B NAL units behind a hand-built SPS, which
//! exercises the parameter-set splitting and hvcC synthesis paths.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use heif_oxide::{
    Channel, Chroma, Colorspace, CompressionFormat, DecoderPlugin, EncoderPlugin, Error,
    ErrorKind, ImageDecoder, ImageEncoder, PixelImage, Result, Suberror,
};

// --- raw image payload codec ---

fn colorspace_tag(cs: Colorspace) -> u8 {
    match cs {
        Colorspace::YCbCr => 0,
        Colorspace::Rgb => 1,
        Colorspace::Monochrome => 2,
        Colorspace::Nonvisual => 3,
        Colorspace::Undefined => 4,
    }
}

fn colorspace_from_tag(tag: u8) -> Colorspace {
    match tag {
        0 => Colorspace::YCbCr,
        1 => Colorspace::Rgb,
        2 => Colorspace::Monochrome,
        3 => Colorspace::Nonvisual,
        _ => Colorspace::Undefined,
    }
}

fn chroma_tag(chroma: Chroma) -> u8 {
    match chroma {
        Chroma::C420 => 0,
        Chroma::C422 => 1,
        Chroma::C444 => 2,
        Chroma::Monochrome => 3,
        Chroma::InterleavedRgb => 4,
        Chroma::InterleavedRgba => 5,
        Chroma::Undefined => 6,
    }
}

fn chroma_from_tag(tag: u8) -> Chroma {
    match tag {
        0 => Chroma::C420,
        1 => Chroma::C422,
        2 => Chroma::C444,
        3 => Chroma::Monochrome,
        4 => Chroma::InterleavedRgb,
        5 => Chroma::InterleavedRgba,
        _ => Chroma::Undefined,
    }
}

fn channel_tag(channel: Channel) -> u8 {
    match channel {
        Channel::Y => 0,
        Channel::Cb => 1,
        Channel::Cr => 2,
        Channel::R => 3,
        Channel::G => 4,
        Channel::B => 5,
        Channel::Alpha => 6,
        Channel::Interleaved => 7,
        Channel::Nonvisual(_) => 8,
    }
}

fn channel_from_tag(tag: u8) -> Channel {
    match tag {
        0 => Channel::Y,
        1 => Channel::Cb,
        2 => Channel::Cr,
        3 => Channel::R,
        4 => Channel::G,
        5 => Channel::B,
        6 => Channel::Alpha,
        7 => Channel::Interleaved,
        _ => Channel::Nonvisual(0),
    }
}

pub fn serialize_image(image: &PixelImage) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"SIMG");
    out.extend_from_slice(&image.width().to_be_bytes());
    out.extend_from_slice(&image.height().to_be_bytes());
    out.push(colorspace_tag(image.colorspace()));
    out.push(chroma_tag(image.chroma()));
    let channels: Vec<Channel> = image.channels().collect();
    out.push(channels.len() as u8);
    for channel in channels {
        let plane = image.plane(channel).unwrap();
        out.push(channel_tag(channel));
        out.extend_from_slice(&plane.width().to_be_bytes());
        out.extend_from_slice(&plane.height().to_be_bytes());
        out.push(plane.bit_depth());
        for y in 0..plane.height() {
            out.extend_from_slice(plane.row(y));
        }
    }
    out
}

pub fn deserialize_image(data: &[u8]) -> Result<PixelImage> {
    let bad = || Error::new(ErrorKind::DecoderPlugin, Suberror::ParseError, "bad stub payload");
    if data.len() < 15 || &data[..4] != b"SIMG" {
        return Err(bad());
    }
    let width = u32::from_be_bytes(data[4..8].try_into().unwrap());
    let height = u32::from_be_bytes(data[8..12].try_into().unwrap());
    let colorspace = colorspace_from_tag(data[12]);
    let chroma = chroma_from_tag(data[13]);
    let plane_count = data[14];
    let mut image = PixelImage::new(width, height, colorspace, chroma);

    let mut pos = 15usize;
    for _ in 0..plane_count {
        if pos + 10 > data.len() {
            return Err(bad());
        }
        let channel = channel_from_tag(data[pos]);
        let w = u32::from_be_bytes(data[pos + 1..pos + 5].try_into().unwrap());
        let h = u32::from_be_bytes(data[pos + 5..pos + 9].try_into().unwrap());
        let depth = data[pos + 9];
        pos += 10;
        image.add_plane(channel, w, h, depth).map_err(|_| bad())?;
        let plane = image.plane_mut(channel).unwrap();
        let row_bytes = w as usize * if depth > 8 { 2 } else { 1 };
        for y in 0..h {
            if pos + row_bytes > data.len() {
                return Err(bad());
            }
            plane.row_mut(y).copy_from_slice(&data[pos..pos + row_bytes]);
            pos += row_bytes;
        }
    }
    Ok(image)
}

// --- "jpeg" stub: codestream is the raw payload ---

struct StubJpegDecoder {
    data: Vec<u8>,
}

impl ImageDecoder for StubJpegDecoder {
    fn push_data(&mut self, data: &[u8]) -> Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn decode_image(&mut self) -> Result<PixelImage> {
        let image = deserialize_image(&self.data)?;
        self.data.clear();
        Ok(image)
    }
}

pub struct StubJpegPlugin;

impl DecoderPlugin for StubJpegPlugin {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Jpeg
    }

    fn new_decoder(&self) -> Box<dyn ImageDecoder> {
        Box::new(StubJpegDecoder { data: Vec::new() })
    }
}

struct StubJpegEncoder;

impl ImageEncoder for StubJpegEncoder {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Jpeg
    }

    fn encode_image(&mut self, image: &PixelImage) -> Result<Vec<u8>> {
        Ok(serialize_image(image))
    }
}

impl EncoderPlugin for StubJpegPlugin {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Jpeg
    }

    fn new_encoder(&self) -> Box<dyn ImageEncoder> {
        Box::new(StubJpegEncoder)
    }
}

// --- "HEVC" stub: Annex-B NAL units around the raw payload ---

struct BitWriter {
    bytes: Vec<u8>,
    bit: u8,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit: 0,
        }
    }

    fn put(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            if self.bit == 0 {
                self.bytes.push(0);
            }
            let b = ((value >> i) & 1) as u8;
            *self.bytes.last_mut().unwrap() |= b << (7 - self.bit);
            self.bit = (self.bit + 1) % 8;
        }
    }

    fn put_ue(&mut self, value: u32) {
        let n = value + 1;
        let bits = 32 - n.leading_zeros();
        self.put(0, bits - 1);
        self.put(n, bits);
    }

    fn finish(mut self) -> Vec<u8> {
        // RBSP stop bit plus alignment.
        self.put(1, 1);
        while self.bit != 0 {
            self.put(0, 1);
        }
        self.bytes
    }
}

fn emulation_prevent(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0u32;
    for &b in data {
        if zeros >= 2 && b <= 3 {
            out.push(3);
            zeros = 0;
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

fn emulation_strip(data: &[u8]) -> Vec<u8> {
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

fn build_sps(image: &PixelImage) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put(0, 4); // sps_video_parameter_set_id
    w.put(0, 3); // sps_max_sub_layers_minus1
    w.put(1, 1); // sps_temporal_id_nesting_flag

    // profile_tier_level
    w.put(0, 2); // general_profile_space
    w.put(0, 1); // general_tier_flag
    w.put(1, 5); // general_profile_idc: Main
    w.put(0x6000_0000, 32); // compatibility flags
    w.put(0x90, 8); // constraint flags, first byte
    for _ in 0..5 {
        w.put(0, 8);
    }
    w.put(93, 8); // general_level_idc

    w.put_ue(0); // sps_seq_parameter_set_id
    let chroma_format_idc = match image.chroma() {
        Chroma::Monochrome => 0,
        Chroma::C420 => 1,
        Chroma::C422 => 2,
        _ => 3,
    };
    w.put_ue(chroma_format_idc);
    if chroma_format_idc == 3 {
        w.put(0, 1); // separate_colour_plane_flag
    }
    w.put_ue(image.width());
    w.put_ue(image.height());
    w.put(0, 1); // conformance_window_flag
    let depth = image
        .plane(Channel::Y)
        .map(|p| p.bit_depth())
        .unwrap_or(8);
    w.put_ue(depth as u32 - 8);
    w.put_ue(depth as u32 - 8);

    let mut nal = vec![33 << 1, 1];
    nal.extend_from_slice(&emulation_prevent(&w.finish()));
    nal
}

const STUB_IDR_NAL_TYPE: u8 = 19;

struct StubHevcEncoder;

impl ImageEncoder for StubHevcEncoder {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Hevc
    }

    fn encode_image(&mut self, image: &PixelImage) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&[0, 0, 1]);
        out.extend_from_slice(&build_sps(image));
        out.extend_from_slice(&[0, 0, 1]);
        out.push(STUB_IDR_NAL_TYPE << 1);
        out.push(1);
        out.extend_from_slice(&emulation_prevent(&serialize_image(image)));
        Ok(out)
    }
}

struct StubHevcDecoder {
    payload: Option<Vec<u8>>,
}

impl ImageDecoder for StubHevcDecoder {
    fn push_data(&mut self, data: &[u8]) -> Result<()> {
        // Length-prefixed NAL units (4-byte prefixes): keep the last IDR payload.
        let mut pos = 0usize;
        while pos + 4 <= data.len() {
            let len = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(Error::new(
                    ErrorKind::DecoderPlugin,
                    Suberror::ParseError,
                    "truncated NAL unit",
                ));
            }
            let nal = &data[pos..pos + len];
            pos += len;
            if !nal.is_empty() && (nal[0] >> 1) & 0x3f == STUB_IDR_NAL_TYPE {
                self.payload = Some(emulation_strip(&nal[2..]));
            }
        }
        Ok(())
    }

    fn decode_image(&mut self) -> Result<PixelImage> {
        let payload = self.payload.take().ok_or_else(|| {
            Error::new(
                ErrorKind::DecoderPlugin,
                Suberror::ParseError,
                "no IDR NAL unit pushed",
            )
        })?;
        deserialize_image(&payload)
    }
}

pub struct StubHevcPlugin;

impl DecoderPlugin for StubHevcPlugin {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Hevc
    }

    fn new_decoder(&self) -> Box<dyn ImageDecoder> {
        Box::new(StubHevcDecoder { payload: None })
    }
}

impl EncoderPlugin for StubHevcPlugin {
    fn format(&self) -> CompressionFormat {
        CompressionFormat::Hevc
    }

    fn new_encoder(&self) -> Box<dyn ImageEncoder> {
        Box::new(StubHevcEncoder)
    }
}

// --- shared helpers ---

/// A context with both stub plugins registered.
pub fn stub_context() -> heif_oxide::HeifContext {
    heif_oxide::HeifContext::builder()
        .register_decoder(Arc::new(StubJpegPlugin))
        .register_encoder(Arc::new(StubJpegPlugin))
        .register_decoder(Arc::new(StubHevcPlugin))
        .register_encoder(Arc::new(StubHevcPlugin))
        .build()
}

/// A YCbCr 4:2:0 test image whose luma is a deterministic gradient.
pub fn ycbcr_image(width: u32, height: u32, seed: u32) -> PixelImage {
    let mut image = PixelImage::new(width, height, Colorspace::YCbCr, Chroma::C420);
    image.add_plane(Channel::Y, width, height, 8).unwrap();
    image
        .add_plane(Channel::Cb, width.div_ceil(2), height.div_ceil(2), 8)
        .unwrap();
    image
        .add_plane(Channel::Cr, width.div_ceil(2), height.div_ceil(2), 8)
        .unwrap();
    let plane = image.plane_mut(Channel::Y).unwrap();
    for y in 0..height {
        for x in 0..width {
            plane.put_sample(x, y, (seed + y * width + x) & 0xff);
        }
    }
    let cb = image.plane_mut(Channel::Cb).unwrap();
    for y in 0..cb.height() {
        for x in 0..cb.width() {
            cb.put_sample(x, y, 128);
        }
    }
    let cr = image.plane_mut(Channel::Cr).unwrap();
    for y in 0..cr.height() {
        for x in 0..cr.width() {
            cr.put_sample(x, y, 128);
        }
    }
    image
}

/// A monochrome test image.
pub fn mono_image(width: u32, height: u32, seed: u32) -> PixelImage {
    let mut image = PixelImage::new(width, height, Colorspace::Monochrome, Chroma::Monochrome);
    image.add_plane(Channel::Y, width, height, 8).unwrap();
    let plane = image.plane_mut(Channel::Y).unwrap();
    for y in 0..height {
        for x in 0..width {
            plane.put_sample(x, y, (seed + y * 7 + x * 3) & 0xff);
        }
    }
    image
}

pub fn assert_planes_equal(a: &PixelImage, b: &PixelImage, channel: Channel) {
    let pa = a.plane(channel).expect("first image misses the channel");
    let pb = b.plane(channel).expect("second image misses the channel");
    assert_eq!((pa.width(), pa.height()), (pb.width(), pb.height()));
    for y in 0..pa.height() {
        assert_eq!(pa.row(y), pb.row(y), "row {y} of {channel:?} differs");
    }
}

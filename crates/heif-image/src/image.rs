use crate::error::{Error, Result};
use crate::side_data::{
    ColorProfile, ContentLightLevel, MasteringDisplayColourVolume, PixelAspectRatio, TaiTimestamp,
};

/// Colorspace of a [`PixelImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colorspace {
    YCbCr,
    Rgb,
    Monochrome,
    Nonvisual,
    Undefined,
}

/// Chroma layout of a [`PixelImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chroma {
    C420,
    C422,
    C444,
    Monochrome,
    /// Interleaved 8-bit RGB in a single plane.
    InterleavedRgb,
    /// Interleaved 8-bit RGBA in a single plane.
    InterleavedRgba,
    Undefined,
}

impl Chroma {
    /// Horizontal and vertical subsampling factors for the chroma planes.
    pub fn subsampling(self) -> (u32, u32) {
        match self {
            Chroma::C420 => (2, 2),
            Chroma::C422 => (2, 1),
            _ => (1, 1),
        }
    }

    pub fn is_interleaved(self) -> bool {
        matches!(self, Chroma::InterleavedRgb | Chroma::InterleavedRgba)
    }
}

/// Channel tag identifying a plane within a [`PixelImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Y,
    Cb,
    Cr,
    R,
    G,
    B,
    Alpha,
    /// The single plane of an interleaved image. Its plane width is given in bytes, i.e.
    /// image width times the number of interleaved components.
    Interleaved,
    /// A numbered nonvisual component.
    Nonvisual(u16),
}

impl Channel {
    /// Whether this channel is subsampled according to the image chroma.
    fn uses_chroma_subsampling(self) -> bool {
        matches!(self, Channel::Cb | Channel::Cr)
    }
}

/// Element datatype of a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDataType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
    Complex32,
    Complex64,
}

impl SampleDataType {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleDataType::U8 | SampleDataType::I8 => 1,
            SampleDataType::U16 | SampleDataType::I16 => 2,
            SampleDataType::U32 | SampleDataType::I32 | SampleDataType::F32 => 4,
            SampleDataType::F64 | SampleDataType::Complex32 => 8,
            SampleDataType::Complex64 => 16,
        }
    }
}

/// Mirroring axis used by the `imir` transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorAxis {
    /// Mirror around the vertical axis (left and right are swapped).
    Vertical,
    /// Mirror around the horizontal axis (top and bottom are swapped).
    Horizontal,
}

const STRIDE_ALIGN: usize = 16;

// Upper bound for a single plane; real limits are enforced by the caller before allocation.
const MAX_PLANE_BYTES: u64 = 1 << 40;

/// A single image plane. The backing store is 8-byte aligned and rows are padded to a stride
/// that is a multiple of 16 bytes; padding bytes are undefined.
#[derive(Debug, Clone)]
pub struct Plane {
    width: u32,
    height: u32,
    bit_depth: u8,
    datatype: SampleDataType,
    stride: usize,
    data: Vec<u64>,
}

impl Plane {
    fn new(width: u32, height: u32, bit_depth: u8, datatype: SampleDataType) -> Result<Self> {
        let bps = datatype.bytes_per_sample();
        let row_bytes = width as u64 * bps as u64;
        let stride = (row_bytes as usize).div_ceil(STRIDE_ALIGN) * STRIDE_ALIGN;
        let total = stride as u64 * height as u64;
        if total > MAX_PLANE_BYTES {
            return Err(Error::AllocationTooLarge {
                requested: total,
                limit: MAX_PLANE_BYTES,
            });
        }
        Ok(Self {
            width,
            height,
            bit_depth,
            datatype,
            stride,
            data: vec![0u64; (total as usize).div_ceil(8)],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    pub fn datatype(&self) -> SampleDataType {
        self.datatype
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// The `y`-th row, without its stride padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let bps = self.datatype.bytes_per_sample();
        let start = y as usize * self.stride;
        &self.bytes()[start..start + self.width as usize * bps]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let bps = self.datatype.bytes_per_sample();
        let start = y as usize * self.stride;
        let end = start + self.width as usize * bps;
        &mut self.bytes_mut()[start..end]
    }

    /// The `y`-th row viewed as `u16` samples. Panics unless the plane datatype is 16-bit.
    pub fn row_u16(&self, y: u32) -> &[u16] {
        assert_eq!(self.datatype.bytes_per_sample(), 2);
        bytemuck::cast_slice(self.row(y))
    }

    pub fn row_u16_mut(&mut self, y: u32) -> &mut [u16] {
        assert_eq!(self.datatype.bytes_per_sample(), 2);
        bytemuck::cast_slice_mut(self.row_mut(y))
    }

    /// Reads the sample at (`x`, `y`) widened to `u32`. Only defined for u8/u16 planes.
    pub fn sample(&self, x: u32, y: u32) -> u32 {
        match self.datatype.bytes_per_sample() {
            1 => self.row(y)[x as usize] as u32,
            2 => self.row_u16(y)[x as usize] as u32,
            _ => panic!("sample() is only defined for 8- and 16-bit planes"),
        }
    }

    pub fn put_sample(&mut self, x: u32, y: u32, value: u32) {
        match self.datatype.bytes_per_sample() {
            1 => self.row_mut(y)[x as usize] = value as u8,
            2 => self.row_u16_mut(y)[x as usize] = value as u16,
            _ => panic!("put_sample() is only defined for 8- and 16-bit planes"),
        }
    }

    fn element(&self, x: u32, y: u32) -> &[u8] {
        let bps = self.datatype.bytes_per_sample();
        let start = y as usize * self.stride + x as usize * bps;
        &self.bytes()[start..start + bps]
    }

    fn put_element(&mut self, x: u32, y: u32, element: &[u8]) {
        let bps = self.datatype.bytes_per_sample();
        let start = y as usize * self.stride + x as usize * bps;
        self.bytes_mut()[start..start + bps].copy_from_slice(element);
    }
}

#[derive(Debug, Clone, Default)]
struct SideData {
    color_profile: Option<ColorProfile>,
    clli: Option<ContentLightLevel>,
    mdcv: Option<MasteringDisplayColourVolume>,
    pixel_aspect_ratio: Option<PixelAspectRatio>,
    premultiplied_alpha: bool,
    sample_duration: u32,
    tai_timestamp: Option<TaiTimestamp>,
    gimi_content_id: Option<String>,
}

/// Typed multi-channel planar image.
///
/// Creating an image fixes its colorspace and chroma layout; planes are added afterwards with
/// their own dimensions and bit depth. The chroma layout determines how the Cb/Cr plane
/// dimensions relate to the image size.
#[derive(Debug, Clone)]
pub struct PixelImage {
    width: u32,
    height: u32,
    colorspace: Colorspace,
    chroma: Chroma,
    planes: Vec<(Channel, Plane)>,
    side: SideData,
}

impl PixelImage {
    pub fn new(width: u32, height: u32, colorspace: Colorspace, chroma: Chroma) -> Self {
        Self {
            width,
            height,
            colorspace,
            chroma,
            planes: Vec::new(),
            side: SideData::default(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn colorspace(&self) -> Colorspace {
        self.colorspace
    }

    pub fn chroma(&self) -> Chroma {
        self.chroma
    }

    pub fn is_nonvisual(&self) -> bool {
        self.colorspace == Colorspace::Nonvisual
    }

    /// Adds a plane of the given geometry, defaulting the datatype from the bit depth.
    pub fn add_plane(&mut self, channel: Channel, width: u32, height: u32, bit_depth: u8) -> Result<()> {
        let datatype = if bit_depth <= 8 {
            SampleDataType::U8
        } else {
            SampleDataType::U16
        };
        self.add_plane_with_datatype(channel, width, height, bit_depth, datatype)
    }

    pub fn add_plane_with_datatype(
        &mut self,
        channel: Channel,
        width: u32,
        height: u32,
        bit_depth: u8,
        datatype: SampleDataType,
    ) -> Result<()> {
        if self.has_channel(channel) {
            return Err(Error::PlaneMismatch("channel already present"));
        }
        let plane = Plane::new(width, height, bit_depth, datatype)?;
        self.planes.push((channel, plane));
        Ok(())
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.planes.iter().any(|(c, _)| *c == channel)
    }

    pub fn has_alpha(&self) -> bool {
        self.has_channel(Channel::Alpha) || self.chroma == Chroma::InterleavedRgba
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.planes.iter().map(|(c, _)| *c)
    }

    pub fn plane(&self, channel: Channel) -> Option<&Plane> {
        self.planes.iter().find(|(c, _)| *c == channel).map(|(_, p)| p)
    }

    pub fn plane_mut(&mut self, channel: Channel) -> Option<&mut Plane> {
        self.planes
            .iter_mut()
            .find(|(c, _)| *c == channel)
            .map(|(_, p)| p)
    }

    pub fn remove_plane(&mut self, channel: Channel) -> Option<Plane> {
        let idx = self.planes.iter().position(|(c, _)| *c == channel)?;
        Some(self.planes.remove(idx).1)
    }

    /// Re-homes a plane from `src` into this image under a new channel tag, without copying.
    ///
    /// Used to attach a decoded auxiliary alpha image to its master.
    pub fn transfer_plane_from_image_as(
        &mut self,
        src: &mut PixelImage,
        src_channel: Channel,
        dst_channel: Channel,
    ) -> Result<()> {
        let plane = src.remove_plane(src_channel).ok_or(Error::MissingChannel)?;
        if self.has_channel(dst_channel) {
            self.remove_plane(dst_channel);
        }
        self.planes.push((dst_channel, plane));
        Ok(())
    }

    fn require_visual(&self) -> Result<()> {
        if self.is_nonvisual() {
            return Err(Error::NonvisualData);
        }
        Ok(())
    }

    /// Crops to the window bounded by the given inclusive pixel coordinates.
    pub fn crop(&self, left: u32, right: u32, top: u32, bottom: u32) -> Result<PixelImage> {
        if left > right || top > bottom || right >= self.width || bottom >= self.height {
            return Err(Error::InvalidCrop);
        }
        let mut out = PixelImage::new(
            right - left + 1,
            bottom - top + 1,
            self.colorspace,
            self.chroma,
        );
        out.side = self.side.clone();
        let (sub_h, sub_v) = self.chroma.subsampling();
        for (channel, plane) in &self.planes {
            let (l, r, t, b) = if channel.uses_chroma_subsampling() {
                (left / sub_h, right / sub_h, top / sub_v, bottom / sub_v)
            } else {
                (left, right, top, bottom)
            };
            let w = (r - l + 1).min(plane.width - l);
            let h = (b - t + 1).min(plane.height - t);
            let mut dst = Plane::new(w, h, plane.bit_depth, plane.datatype)?;
            let bps = plane.datatype.bytes_per_sample();
            for y in 0..h {
                let src_row = plane.row(t + y);
                let from = l as usize * bps;
                dst.row_mut(y)
                    .copy_from_slice(&src_row[from..from + w as usize * bps]);
            }
            out.planes.push((*channel, dst));
        }
        Ok(out)
    }

    /// Rotates counter-clockwise by a multiple of 90 degrees, returning a new image.
    pub fn rotate_ccw(&self, angle: u32) -> Result<PixelImage> {
        if angle % 90 != 0 {
            return Err(Error::InvalidRotation(angle));
        }
        let angle = angle % 360;
        if angle == 0 {
            return Ok(self.clone());
        }
        let (out_w, out_h) = if angle == 180 {
            (self.width, self.height)
        } else {
            (self.height, self.width)
        };
        let mut out = PixelImage::new(out_w, out_h, self.colorspace, self.chroma);
        out.side = self.side.clone();
        for (channel, plane) in &self.planes {
            let (pw, ph) = (plane.width, plane.height);
            let (dw, dh) = if angle == 180 { (pw, ph) } else { (ph, pw) };
            let mut dst = Plane::new(dw, dh, plane.bit_depth, plane.datatype)?;
            for y in 0..dh {
                for x in 0..dw {
                    let (sx, sy) = match angle {
                        // out(x, y) = in(y, h_in - 1 - x)
                        90 => (y, ph - 1 - x),
                        180 => (pw - 1 - x, ph - 1 - y),
                        // out(x, y) = in(w_in - 1 - y, x)
                        270 => (pw - 1 - y, x),
                        _ => unreachable!(),
                    };
                    dst.put_element(x, y, plane.element(sx, sy));
                }
            }
            out.planes.push((*channel, dst));
        }
        Ok(out)
    }

    /// Mirrors all planes in place around the given axis.
    pub fn mirror_inplace(&mut self, axis: MirrorAxis) -> Result<()> {
        for (_, plane) in &mut self.planes {
            let (w, h) = (plane.width, plane.height);
            match axis {
                MirrorAxis::Vertical => {
                    let bps = plane.datatype.bytes_per_sample();
                    for y in 0..h {
                        let row = plane.row_mut(y);
                        for x in 0..(w / 2) as usize {
                            let other = (w as usize - 1 - x) * bps;
                            for k in 0..bps {
                                row.swap(x * bps + k, other + k);
                            }
                        }
                    }
                }
                MirrorAxis::Horizontal => {
                    for y in 0..h / 2 {
                        let other = h - 1 - y;
                        let bps = plane.datatype.bytes_per_sample();
                        let row_len = w as usize * bps;
                        let stride = plane.stride;
                        let bytes = plane.bytes_mut();
                        let (a, b) = (y as usize * stride, other as usize * stride);
                        for k in 0..row_len {
                            bytes.swap(a + k, b + k);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Fills all RGB(A) planes with the given 16-bit color, scaled down to the plane depth.
    pub fn fill_rgb_16bit(&mut self, r: u16, g: u16, b: u16, a: u16) -> Result<()> {
        self.require_visual()?;
        if self.chroma.is_interleaved() {
            let with_alpha = self.chroma == Chroma::InterleavedRgba;
            let plane = self.plane_mut(Channel::Interleaved).ok_or(Error::MissingChannel)?;
            let rgb = [(r >> 8) as u8, (g >> 8) as u8, (b >> 8) as u8, (a >> 8) as u8];
            let n = if with_alpha { 4 } else { 3 };
            for y in 0..plane.height {
                for px in plane.row_mut(y).chunks_exact_mut(n) {
                    px.copy_from_slice(&rgb[..n]);
                }
            }
            return Ok(());
        }
        for (channel, value) in [
            (Channel::R, r),
            (Channel::G, g),
            (Channel::B, b),
            (Channel::Alpha, a),
        ] {
            let Some(plane) = self.plane_mut(channel) else {
                continue;
            };
            let shift = 16 - plane.bit_depth as u32;
            let v = (value as u32) >> shift;
            for y in 0..plane.height {
                for x in 0..plane.width {
                    plane.put_sample(x, y, v);
                }
            }
        }
        Ok(())
    }

    /// Composites `other` onto this image at the signed offset, clipping to the canvas.
    ///
    /// Both images must share colorspace, chroma and per-channel bit depths.
    pub fn overlay(&mut self, other: &PixelImage, dx: i64, dy: i64) -> Result<()> {
        self.require_visual()?;
        if self.colorspace != other.colorspace || self.chroma != other.chroma {
            return Err(Error::IncompatibleFormats("colorspace or chroma differs"));
        }
        if self.chroma.is_interleaved() {
            return Err(Error::IncompatibleFormats("overlay requires planar images"));
        }
        let (sub_h, sub_v) = self.chroma.subsampling();
        let channels: Vec<Channel> = other.channels().collect();
        for channel in channels {
            let src = other.plane(channel).ok_or(Error::MissingChannel)?;
            // The canvas may legitimately have no alpha even when a composited image does.
            let Some(dst) = self.plane_mut(channel) else {
                continue;
            };
            if src.bit_depth != dst.bit_depth {
                return Err(Error::IncompatibleFormats("bit depth differs"));
            }
            let (cdx, cdy) = if channel.uses_chroma_subsampling() {
                (dx / sub_h as i64, dy / sub_v as i64)
            } else {
                (dx, dy)
            };
            let bps = src.datatype.bytes_per_sample();
            for sy in 0..src.height as i64 {
                let ty = sy + cdy;
                if ty < 0 || ty >= dst.height as i64 {
                    continue;
                }
                let src_x0 = (-cdx).clamp(0, src.width as i64);
                let src_x1 = (dst.width as i64 - cdx).clamp(0, src.width as i64);
                if src_x0 >= src_x1 {
                    continue;
                }
                let count = (src_x1 - src_x0) as usize * bps;
                let src_off = src_x0 as usize * bps;
                let dst_off = (src_x0 + cdx) as usize * bps;
                let src_row = src.row(sy as u32);
                let dst_row = dst.row_mut(ty as u32);
                dst_row[dst_off..dst_off + count]
                    .copy_from_slice(&src_row[src_off..src_off + count]);
            }
        }
        Ok(())
    }

    /// Scales to the target size with nearest-neighbor sampling.
    pub fn scale_nearest_neighbor(&self, target_width: u32, target_height: u32) -> Result<PixelImage> {
        self.require_visual()?;
        if target_width == 0 || target_height == 0 {
            return Err(Error::InvalidCrop);
        }
        let mut out = PixelImage::new(target_width, target_height, self.colorspace, self.chroma);
        out.side = self.side.clone();
        for (channel, plane) in &self.planes {
            let dw = (plane.width as u64 * target_width as u64 / self.width as u64).max(1) as u32;
            let dh = (plane.height as u64 * target_height as u64 / self.height as u64).max(1) as u32;
            let mut dst = Plane::new(dw, dh, plane.bit_depth, plane.datatype)?;
            for y in 0..dh {
                let sy = (y as u64 * plane.height as u64 / dh as u64) as u32;
                for x in 0..dw {
                    let sx = (x as u64 * plane.width as u64 / dw as u64) as u32;
                    dst.put_element(x, y, plane.element(sx, sy));
                }
            }
            out.planes.push((*channel, dst));
        }
        Ok(out)
    }
}

// Side-data accessors.
impl PixelImage {
    pub fn color_profile(&self) -> Option<&ColorProfile> {
        self.side.color_profile.as_ref()
    }

    pub fn set_color_profile(&mut self, profile: Option<ColorProfile>) {
        self.side.color_profile = profile;
    }

    pub fn content_light_level(&self) -> Option<ContentLightLevel> {
        self.side.clli
    }

    pub fn set_content_light_level(&mut self, clli: Option<ContentLightLevel>) {
        self.side.clli = clli;
    }

    pub fn mastering_display_colour_volume(&self) -> Option<MasteringDisplayColourVolume> {
        self.side.mdcv
    }

    pub fn set_mastering_display_colour_volume(
        &mut self,
        mdcv: Option<MasteringDisplayColourVolume>,
    ) {
        self.side.mdcv = mdcv;
    }

    pub fn pixel_aspect_ratio(&self) -> Option<PixelAspectRatio> {
        self.side.pixel_aspect_ratio
    }

    pub fn set_pixel_aspect_ratio(&mut self, pasp: Option<PixelAspectRatio>) {
        self.side.pixel_aspect_ratio = pasp;
    }

    pub fn premultiplied_alpha(&self) -> bool {
        self.side.premultiplied_alpha
    }

    pub fn set_premultiplied_alpha(&mut self, premultiplied: bool) {
        self.side.premultiplied_alpha = premultiplied;
    }

    /// Duration of this image in track timescale units; 0 outside of sequences.
    pub fn sample_duration(&self) -> u32 {
        self.side.sample_duration
    }

    pub fn set_sample_duration(&mut self, duration: u32) {
        self.side.sample_duration = duration;
    }

    pub fn tai_timestamp(&self) -> Option<&TaiTimestamp> {
        self.side.tai_timestamp.as_ref()
    }

    pub fn set_tai_timestamp(&mut self, timestamp: Option<TaiTimestamp>) {
        self.side.tai_timestamp = timestamp;
    }

    pub fn gimi_content_id(&self) -> Option<&str> {
        self.side.gimi_content_id.as_deref()
    }

    pub fn set_gimi_content_id(&mut self, id: Option<String>) {
        self.side.gimi_content_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_image(w: u32, h: u32) -> PixelImage {
        let mut img = PixelImage::new(w, h, Colorspace::Monochrome, Chroma::Monochrome);
        img.add_plane(Channel::Y, w, h, 8).unwrap();
        let plane = img.plane_mut(Channel::Y).unwrap();
        for y in 0..h {
            for x in 0..w {
                plane.put_sample(x, y, (y * w + x) & 0xff);
            }
        }
        img
    }

    #[test]
    fn plane_geometry() {
        let mut img = PixelImage::new(16, 16, Colorspace::YCbCr, Chroma::C420);
        img.add_plane(Channel::Y, 16, 16, 8).unwrap();
        img.add_plane(Channel::Cb, 8, 8, 8).unwrap();
        img.add_plane(Channel::Cr, 8, 8, 8).unwrap();

        let y = img.plane(Channel::Y).unwrap();
        assert!(y.stride() >= 16);
        assert_eq!(y.row(0).len(), 16);
        assert_eq!(img.plane(Channel::Cb).unwrap().width(), 8);
    }

    #[test]
    fn sixteen_bit_planes() {
        let mut img = PixelImage::new(4, 2, Colorspace::Monochrome, Chroma::Monochrome);
        img.add_plane(Channel::Y, 4, 2, 12).unwrap();
        let plane = img.plane_mut(Channel::Y).unwrap();
        assert_eq!(plane.datatype(), SampleDataType::U16);
        plane.put_sample(3, 1, 0xfff);
        assert_eq!(plane.sample(3, 1), 0xfff);
        assert_eq!(plane.row_u16(1)[3], 0xfff);
    }

    #[test]
    fn rotate_90_ccw() {
        // 8x4 input; output(x, y) must equal input(y, 3 - x).
        let img = gradient_image(8, 4);
        let rotated = img.rotate_ccw(90).unwrap();
        assert_eq!(rotated.plane(Channel::Y).unwrap().width(), 4);
        assert_eq!(rotated.plane(Channel::Y).unwrap().height(), 8);
        let src = img.plane(Channel::Y).unwrap();
        let dst = rotated.plane(Channel::Y).unwrap();
        for y in 0..8 {
            for x in 0..4 {
                assert_eq!(dst.sample(x, y), src.sample(y, 3 - x), "at ({x},{y})");
            }
        }
    }

    #[test]
    fn rotate_identities() {
        let img = gradient_image(6, 4);
        let same = img.rotate_ccw(0).unwrap();
        let four_times = img
            .rotate_ccw(90)
            .unwrap()
            .rotate_ccw(90)
            .unwrap()
            .rotate_ccw(90)
            .unwrap()
            .rotate_ccw(90)
            .unwrap();
        let src = img.plane(Channel::Y).unwrap();
        for (result, label) in [(&same, "rot0"), (&four_times, "rot90 x4")] {
            let dst = result.plane(Channel::Y).unwrap();
            for y in 0..4 {
                for x in 0..6 {
                    assert_eq!(dst.sample(x, y), src.sample(x, y), "{label} at ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn mirror_twice_is_identity() {
        let img = gradient_image(5, 3);
        for axis in [MirrorAxis::Vertical, MirrorAxis::Horizontal] {
            let mut mirrored = img.clone();
            mirrored.mirror_inplace(axis).unwrap();
            mirrored.mirror_inplace(axis).unwrap();
            let src = img.plane(Channel::Y).unwrap();
            let dst = mirrored.plane(Channel::Y).unwrap();
            for y in 0..3 {
                for x in 0..5 {
                    assert_eq!(dst.sample(x, y), src.sample(x, y));
                }
            }
        }
    }

    #[test]
    fn mirror_vertical_swaps_columns() {
        let img = gradient_image(4, 2);
        let mut mirrored = img.clone();
        mirrored.mirror_inplace(MirrorAxis::Vertical).unwrap();
        let src = img.plane(Channel::Y).unwrap();
        let dst = mirrored.plane(Channel::Y).unwrap();
        for y in 0..2 {
            for x in 0..4 {
                assert_eq!(dst.sample(x, y), src.sample(3 - x, y));
            }
        }
    }

    #[test]
    fn crop_window() {
        let img = gradient_image(8, 8);
        let cropped = img.crop(2, 5, 1, 6).unwrap();
        assert_eq!(cropped.width(), 4);
        assert_eq!(cropped.height(), 6);
        let src = img.plane(Channel::Y).unwrap();
        let dst = cropped.plane(Channel::Y).unwrap();
        assert_eq!(dst.sample(0, 0), src.sample(2, 1));
        assert_eq!(dst.sample(3, 5), src.sample(5, 6));
    }

    #[test]
    fn crop_rejects_inverted_window() {
        let img = gradient_image(8, 8);
        assert!(img.crop(5, 2, 0, 7).is_err());
        assert!(img.crop(0, 8, 0, 7).is_err());
    }

    #[test]
    fn overlay_clips() {
        let mut canvas = PixelImage::new(4, 4, Colorspace::Rgb, Chroma::C444);
        for c in [Channel::R, Channel::G, Channel::B] {
            canvas.add_plane(c, 4, 4, 8).unwrap();
        }
        canvas.fill_rgb_16bit(0, 0, 0, 0xffff).unwrap();

        let mut tile = PixelImage::new(2, 2, Colorspace::Rgb, Chroma::C444);
        for c in [Channel::R, Channel::G, Channel::B] {
            tile.add_plane(c, 2, 2, 8).unwrap();
        }
        tile.fill_rgb_16bit(0xffff, 0xffff, 0xffff, 0xffff).unwrap();

        // Partially outside the canvas on the top-left.
        canvas.overlay(&tile, -1, -1).unwrap();
        let r = canvas.plane(Channel::R).unwrap();
        assert_eq!(r.sample(0, 0), 0xff);
        assert_eq!(r.sample(1, 0), 0);
        assert_eq!(r.sample(0, 1), 0);

        // Fully outside: a silent no-op.
        canvas.overlay(&tile, 10, 10).unwrap();
    }

    #[test]
    fn transfer_plane() {
        let mut master = gradient_image(4, 4);
        let mut alpha = gradient_image(4, 4);
        master
            .transfer_plane_from_image_as(&mut alpha, Channel::Y, Channel::Alpha)
            .unwrap();
        assert!(master.has_channel(Channel::Alpha));
        assert!(!alpha.has_channel(Channel::Y));
    }

    #[test]
    fn scale_nearest() {
        let img = gradient_image(4, 4);
        let scaled = img.scale_nearest_neighbor(8, 8).unwrap();
        let src = img.plane(Channel::Y).unwrap();
        let dst = scaled.plane(Channel::Y).unwrap();
        assert_eq!(dst.width(), 8);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(dst.sample(x, y), src.sample(x / 2, y / 2));
            }
        }
    }
}

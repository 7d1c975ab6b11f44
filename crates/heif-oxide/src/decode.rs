//! Item decoding: coded images via plugins, derived images (grid, identity, overlay),
//! uncompressed and mask payloads, and the shared post-decode transform step.

use std::sync::atomic::{AtomicU64, Ordering};

use heif_bmff::boxes::HeifBox;
use heif_bmff::{Error, FourCC, Result, SecurityLimits, Suberror};
use heif_image::{Channel, Chroma, Colorspace, PixelImage};
use heif_threadpool::DecodePool;

use crate::codecs::{length_prefixed_to_annexb, CompressionFormat, PluginRegistry};
use crate::file::HeifFile;
use crate::item::derived::{ImageGrid, ImageOverlay};
use crate::item::{unci, ImageItem, ItemModel};

/// Cap on recursion through derived images and auxiliaries.
const MAX_DERIVATION_DEPTH: u32 = 16;

/// Borrowed decoding state, shareable across tile workers.
pub(crate) struct ItemDecoder<'a> {
    pub file: &'a HeifFile,
    pub items: &'a ItemModel,
    pub registry: &'a PluginRegistry,
    pub limits: &'a SecurityLimits,
    pub pool: &'a DecodePool,
    pub decoded_pixels: &'a AtomicU64,
}

impl ItemDecoder<'_> {
    pub fn decode(&self, item_id: u32) -> Result<PixelImage> {
        self.decode_inner(item_id, 0)
    }

    fn decode_inner(&self, item_id: u32, depth: u32) -> Result<PixelImage> {
        if depth > MAX_DERIVATION_DEPTH {
            return Err(Error::invalid_input(
                Suberror::ReferenceCycle,
                "derivation chain is too deep",
            ));
        }

        let item = self.items.item(item_id).ok_or_else(|| {
            Error::invalid_input(
                Suberror::NonexistentItemReferenced,
                format!("item {item_id} does not exist"),
            )
        })?;

        let mut image = match item.item_type {
            Some(FourCC::HVC1 | FourCC::HEV1) => self.decode_coded(item, CompressionFormat::Hevc)?,
            Some(FourCC::AV01) => self.decode_coded(item, CompressionFormat::Av1)?,
            Some(FourCC::JPEG) => self.decode_coded(item, CompressionFormat::Jpeg)?,
            Some(FourCC::J2K1) => self.decode_coded(item, CompressionFormat::Jpeg2000)?,
            Some(FourCC::VVC1) => self.decode_coded(item, CompressionFormat::Vvc)?,
            Some(FourCC::GRID) => self.decode_grid(item, depth)?,
            Some(FourCC::IDEN) => self.decode_identity(item, depth)?,
            Some(FourCC::IOVL) => self.decode_overlay(item, depth)?,
            Some(FourCC::UNCI) => self.decode_uncompressed_item(item)?,
            Some(FourCC::MSKI) => self.decode_mask_item(item)?,
            _ => {
                return Err(Error::unsupported(
                    Suberror::UnsupportedImageType,
                    format!("item {item_id} is not a decodable image"),
                ));
            }
        };

        self.account_pixels(&image)?;
        self.check_pixi(item, &image)?;

        // Auxiliary alpha: decoded separately, its luma plane re-homed onto the master.
        if let Some(alpha_id) = item.alpha_image {
            let mut alpha = self.decode_inner(alpha_id, depth + 1)?;
            if alpha.plane(Channel::Y).is_some() {
                image.transfer_plane_from_image_as(&mut alpha, Channel::Y, Channel::Alpha)?;
            }
            image.set_premultiplied_alpha(item.premultiplied_alpha);
        }

        // Transform properties apply in the order they are associated with the item.
        for (_, property) in &item.properties {
            image = self.apply_transform(property, image)?;
        }

        self.attach_side_data(item, &mut image);
        Ok(image)
    }

    fn account_pixels(&self, image: &PixelImage) -> Result<()> {
        let limits = self.limits;
        if image.width() > limits.max_image_width || image.height() > limits.max_image_height {
            return Err(Error::limit(format!(
                "decoded image of {}x{} exceeds the maximum image size",
                image.width(),
                image.height()
            )));
        }
        let pixels = image.width() as u64 * image.height() as u64;
        let total = self.decoded_pixels.fetch_add(pixels, Ordering::Relaxed) + pixels;
        if total > limits.max_total_pixels {
            return Err(Error::limit(
                "total decoded pixel count exceeds the configured limit",
            ));
        }
        Ok(())
    }

    fn check_pixi(&self, item: &ImageItem, image: &PixelImage) -> Result<()> {
        let Some(declared) = item.pixi_bit_depth() else {
            return Ok(());
        };
        let Some(actual) = image
            .plane(Channel::Y)
            .or_else(|| image.plane(Channel::R))
            .map(|p| p.bit_depth())
        else {
            return Ok(());
        };
        if declared != actual {
            return Err(Error::invalid_input(
                Suberror::PixiMismatch,
                format!("pixi declares {declared} bits but the image has {actual}"),
            ));
        }
        Ok(())
    }

    fn apply_transform(&self, property: &HeifBox, image: PixelImage) -> Result<PixelImage> {
        if let Some(irot) = property.as_irot() {
            return Ok(image.rotate_ccw(irot.degrees_ccw())?);
        }
        if let Some(imir) = property.as_imir() {
            let mut image = image;
            image.mirror_inplace(imir.axis)?;
            return Ok(image);
        }
        if let Some(clap) = property.as_clap() {
            let (left, right, top, bottom) =
                clap.crop_window(image.width(), image.height())?;
            // Out-of-range windows clamp to the image; empty or inverted windows are errors.
            let left = left.clamp(0, image.width() as i64 - 1) as u32;
            let right = right.clamp(0, image.width() as i64 - 1) as u32;
            let top = top.clamp(0, image.height() as i64 - 1) as u32;
            let bottom = bottom.clamp(0, image.height() as i64 - 1) as u32;
            if right < left || bottom < top {
                return Err(Error::invalid_input(
                    Suberror::InvalidCleanAperture,
                    "clean aperture selects an empty window",
                ));
            }
            return Ok(image.crop(left, right, top, bottom)?);
        }
        Ok(image)
    }

    fn attach_side_data(&self, item: &ImageItem, image: &mut PixelImage) {
        for (_, property) in &item.properties {
            if let Some(colr) = property.as_colr() {
                image.set_color_profile(Some(colr.profile.clone()));
            } else if let Some(clli) = property.as_clli() {
                image.set_content_light_level(Some(clli.clli));
            } else if let Some(mdcv) = property.as_mdcv() {
                image.set_mastering_display_colour_volume(Some(mdcv.mdcv));
            } else if let Some(pasp) = property.as_pasp() {
                image.set_pixel_aspect_ratio(Some(pasp.ratio));
            }
        }
    }

    // --- coded items ---

    fn decode_coded(&self, item: &ImageItem, format: CompressionFormat) -> Result<PixelImage> {
        let mut decoder = self.registry.decoder_for(format)?;
        let mut length_size = 4u8;

        match format {
            CompressionFormat::Hevc => {
                let hvcc = item.hvcc().ok_or_else(|| {
                    Error::invalid_input(
                        Suberror::InvalidProperty,
                        format!("coded item {} carries no hvcC property", item.id),
                    )
                })?;
                length_size = hvcc.length_size;
                let config = hvcc.header_nals();
                let config = if decoder.needs_start_codes() {
                    length_prefixed_to_annexb(&config, 4)?
                } else {
                    config
                };
                decoder.push_data(&config)?;
            }
            CompressionFormat::Vvc => {
                let vvcc = item
                    .properties
                    .iter()
                    .find_map(|(_, p)| p.as_vvcc())
                    .ok_or_else(|| {
                        Error::invalid_input(
                            Suberror::InvalidProperty,
                            format!("coded item {} carries no vvcC property", item.id),
                        )
                    })?;
                length_size = vvcc.length_size;
                let config = vvcc.header_nals();
                let config = if decoder.needs_start_codes() {
                    length_prefixed_to_annexb(&config, 4)?
                } else {
                    config
                };
                decoder.push_data(&config)?;
            }
            CompressionFormat::Av1 => {
                let av1c = item
                    .properties
                    .iter()
                    .find_map(|(_, p)| p.as_av1c())
                    .ok_or_else(|| {
                        Error::invalid_input(
                            Suberror::InvalidProperty,
                            format!("coded item {} carries no av1C property", item.id),
                        )
                    })?;
                decoder.push_data(&av1c.config_obus)?;
            }
            _ => {}
        }

        let data = self.file.read_item_data(item.id)?;
        let payload = if decoder.needs_start_codes()
            && matches!(format, CompressionFormat::Hevc | CompressionFormat::Vvc)
        {
            length_prefixed_to_annexb(&data, length_size)?
        } else {
            data
        };
        decoder.push_data(&payload)?;
        decoder.decode_image()
    }

    // --- derived items ---

    fn decode_identity(&self, item: &ImageItem, depth: u32) -> Result<PixelImage> {
        let [source] = item.sources.as_slice() else {
            return Err(Error::invalid_input(
                Suberror::MissingGridTiles,
                "identity item must reference exactly one source",
            ));
        };
        self.decode_inner(*source, depth + 1)
    }

    fn decode_grid(&self, item: &ImageItem, depth: u32) -> Result<PixelImage> {
        let grid = ImageGrid::parse(&self.file.read_item_data(item.id)?)?;
        if item.sources.len() as u32 != grid.tile_count() {
            return Err(Error::invalid_input(
                Suberror::MissingGridTiles,
                "grid tile count mismatch",
            ));
        }
        let (w, h) = (grid.output_width, grid.output_height);
        if w > self.limits.max_image_width || h > self.limits.max_image_height {
            return Err(Error::limit("grid canvas exceeds the maximum image size"));
        }

        // Decode all tiles, fanning out over the pool; blitting stays on this thread so the
        // canvas needs no locking.
        let jobs: Vec<Box<dyn FnOnce() -> Result<PixelImage> + Send + '_>> = item
            .sources
            .iter()
            .map(|&tile_id| {
                Box::new(move || self.decode_inner(tile_id, depth + 1))
                    as Box<dyn FnOnce() -> Result<PixelImage> + Send + '_>
            })
            .collect();
        let tiles = self
            .pool
            .scope_run(jobs)
            .into_iter()
            .collect::<Result<Vec<PixelImage>>>()?;

        let first = tiles.first().expect("grids have at least one tile");
        for tile in &tiles {
            if tile.chroma() != first.chroma() || tile.colorspace() != first.colorspace() {
                return Err(Error::invalid_input(
                    Suberror::IncompatibleTileChroma,
                    "grid tiles disagree in chroma format",
                ));
            }
        }

        let mut canvas = PixelImage::new(w, h, first.colorspace(), first.chroma());
        let (sub_h, sub_v) = first.chroma().subsampling();
        for channel in [Channel::Y, Channel::R, Channel::G, Channel::B] {
            if let Some(plane) = first.plane(channel) {
                canvas.add_plane(channel, w, h, plane.bit_depth())?;
            }
        }
        for channel in [Channel::Cb, Channel::Cr] {
            if let Some(plane) = first.plane(channel) {
                canvas.add_plane(channel, w.div_ceil(sub_h), h.div_ceil(sub_v), plane.bit_depth())?;
            }
        }

        let mut x0 = 0i64;
        let mut y0 = 0i64;
        let mut row_height = 0u32;
        for (index, tile) in tiles.iter().enumerate() {
            // A tile discovering an alpha channel adds the canvas plane late, default opaque.
            if tile.plane(Channel::Alpha).is_some() && !canvas.has_channel(Channel::Alpha) {
                let depth_bits = tile.plane(Channel::Alpha).unwrap().bit_depth();
                canvas.add_plane(Channel::Alpha, w, h, depth_bits)?;
                let max = (1u32 << depth_bits) - 1;
                let plane = canvas.plane_mut(Channel::Alpha).unwrap();
                for y in 0..h {
                    for x in 0..w {
                        plane.put_sample(x, y, max);
                    }
                }
            }

            canvas.overlay(tile, x0, y0)?;

            row_height = row_height.max(tile.height());
            x0 += tile.width() as i64;
            if (index + 1) % grid.columns as usize == 0 {
                x0 = 0;
                y0 += row_height as i64;
                row_height = 0;
            }
        }

        Ok(canvas)
    }

    fn decode_overlay(&self, item: &ImageItem, depth: u32) -> Result<PixelImage> {
        if item.sources.is_empty() {
            return Err(Error::invalid_input(
                Suberror::MissingGridTiles,
                "overlay references no images",
            ));
        }
        let overlay = ImageOverlay::parse(item.sources.len(), &self.file.read_item_data(item.id)?)?;
        let (w, h) = (overlay.canvas_width, overlay.canvas_height);
        if w == 0 || h == 0 || w > self.limits.max_image_width || h > self.limits.max_image_height
        {
            return Err(Error::invalid_input(
                Suberror::InvalidOverlayData,
                "overlay canvas size out of range",
            ));
        }

        let mut canvas = PixelImage::new(w, h, Colorspace::Rgb, Chroma::C444);
        for channel in [Channel::R, Channel::G, Channel::B] {
            canvas.add_plane(channel, w, h, 8)?;
        }
        let [r, g, b, a] = overlay.background_color;
        canvas.fill_rgb_16bit(r, g, b, a)?;

        for (&source, &(dx, dy)) in item.sources.iter().zip(&overlay.offsets) {
            let decoded = self.decode_inner(source, depth + 1)?;
            let rgb = to_planar_rgb(&decoded)?;
            // Offsets may put the image partially or fully outside the canvas; clip silently.
            canvas.overlay(&rgb, dx as i64, dy as i64)?;
        }

        Ok(canvas)
    }

    // --- uncompressed and mask items ---

    fn decode_uncompressed_item(&self, item: &ImageItem) -> Result<PixelImage> {
        let cmpd = item
            .properties
            .iter()
            .find_map(|(_, p)| p.as_cmpd())
            .ok_or_else(|| {
                Error::invalid_input(
                    Suberror::InvalidProperty,
                    "unci item carries no cmpd property",
                )
            })?;
        let uncc = item
            .properties
            .iter()
            .find_map(|(_, p)| p.as_uncc())
            .ok_or_else(|| {
                Error::invalid_input(
                    Suberror::InvalidProperty,
                    "unci item carries no uncC property",
                )
            })?;
        let data = self.file.read_item_data(item.id)?;
        unci::decode_uncompressed(&data, cmpd, uncc, item.width, item.height)
    }

    fn decode_mask_item(&self, item: &ImageItem) -> Result<PixelImage> {
        let bit_depth = item.pixi_bit_depth().unwrap_or(8);
        let data = self.file.read_item_data(item.id)?;
        unci::decode_mask(&data, bit_depth, item.width, item.height)
    }
}

/// Converts a decoded image to 8-bit planar RGB for overlay compositing.
///
/// Already-RGB input passes through; YCbCr and monochrome are converted with the full-range
/// BT.601 matrix, which is all that overlay compositing needs.
pub(crate) fn to_planar_rgb(image: &PixelImage) -> Result<PixelImage> {
    match (image.colorspace(), image.chroma()) {
        (Colorspace::Rgb, Chroma::C444) => return Ok(image.clone()),
        (Colorspace::Nonvisual, _) => {
            return Err(Error::new(
                heif_bmff::ErrorKind::ColorProfile,
                Suberror::InvalidPixelFormat,
                "cannot composite nonvisual data",
            ));
        }
        _ => {}
    }

    let y_plane = image.plane(Channel::Y).ok_or_else(|| {
        Error::new(
            heif_bmff::ErrorKind::ColorProfile,
            Suberror::InvalidPixelFormat,
            "composite source has no luma plane",
        )
    })?;
    if y_plane.bit_depth() != 8 {
        return Err(Error::unsupported(
            Suberror::UnsupportedBitDepth,
            "overlay compositing supports 8-bit sources only",
        ));
    }

    let (w, h) = (image.width(), image.height());
    let mut out = PixelImage::new(w, h, Colorspace::Rgb, Chroma::C444);
    for channel in [Channel::R, Channel::G, Channel::B] {
        out.add_plane(channel, w, h, 8)?;
    }

    let (sub_h, sub_v) = image.chroma().subsampling();
    let cb = image.plane(Channel::Cb);
    let cr = image.plane(Channel::Cr);

    for y in 0..h {
        for x in 0..w {
            let luma = y_plane.sample(x, y) as f32;
            let (pb, pr) = match (cb, cr) {
                (Some(cb), Some(cr)) => {
                    let cx = (x / sub_h).min(cb.width() - 1);
                    let cy = (y / sub_v).min(cb.height() - 1);
                    (
                        cb.sample(cx, cy) as f32 - 128.0,
                        cr.sample(cx, cy) as f32 - 128.0,
                    )
                }
                _ => (0.0, 0.0),
            };
            let r = luma + 1.402 * pr;
            let g = luma - 0.344136 * pb - 0.714136 * pr;
            let b = luma + 1.772 * pb;
            out.plane_mut(Channel::R)
                .unwrap()
                .put_sample(x, y, r.clamp(0.0, 255.0) as u32);
            out.plane_mut(Channel::G)
                .unwrap()
                .put_sample(x, y, g.clamp(0.0, 255.0) as u32);
            out.plane_mut(Channel::B)
                .unwrap()
                .put_sample(x, y, b.clamp(0.0, 255.0) as u32);
        }
    }

    if let Some(alpha) = image.plane(Channel::Alpha) {
        out.add_plane(Channel::Alpha, alpha.width(), alpha.height(), alpha.bit_depth())?;
        let out_alpha = out.plane_mut(Channel::Alpha).unwrap();
        for y in 0..alpha.height() {
            out_alpha.row_mut(y).copy_from_slice(alpha.row(y));
        }
    }

    Ok(out)
}

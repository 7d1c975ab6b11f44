//! The top-level context: reading files into the item/track model, decoding images, and
//! building files for writing.

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use heif_bitstream::{ByteSource, MemorySource};
use heif_bmff::boxes::{
    Av1CBox, BoxData, HeifBox, IspeBox, PixiBox, UriBox, UrimBox, VisualSampleEntryBox,
};
use heif_bmff::{Error, ErrorKind, FourCC, Result, SecurityLimits, Suberror};
use heif_image::{Channel, PixelImage, TaiTimestamp};
use heif_threadpool::DecodePool;

use crate::codecs::{
    extract_av1_sequence_header, synthesize_hvcc, CompressionFormat, DecoderPlugin,
    EncoderPlugin, ImageEncoder, PluginRegistry,
};
use crate::decode::ItemDecoder;
use crate::file::{visit_mut, HeifFile};
use crate::item::{interpret, ImageItem, ItemModel};
use crate::track::{RawSequenceSample, Track, TrackOptions};

/// Builder for [`HeifContext`].
#[derive(Debug, Default)]
pub struct HeifContextBuilder {
    limits: Option<SecurityLimits>,
    pool: Option<DecodePool>,
    max_decoding_threads: Option<usize>,
    registry: PluginRegistry,
}

impl HeifContextBuilder {
    pub fn security_limits(mut self, limits: SecurityLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Sets a custom tile-decoding pool.
    pub fn pool(mut self, pool: DecodePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Bounds the tile-decoding worker count; 0 decodes inline.
    pub fn max_decoding_threads(mut self, n: usize) -> Self {
        self.max_decoding_threads = Some(n);
        self
    }

    pub fn register_decoder(mut self, plugin: Arc<dyn DecoderPlugin>) -> Self {
        self.registry.register_decoder(plugin);
        self
    }

    pub fn register_encoder(mut self, plugin: Arc<dyn EncoderPlugin>) -> Self {
        self.registry.register_encoder(plugin);
        self
    }

    pub fn build(self) -> HeifContext {
        let limits = self.limits.unwrap_or_default();
        let pool = match (self.pool, self.max_decoding_threads) {
            (Some(pool), _) => pool,
            (None, Some(n)) => DecodePool::with_max_threads(n),
            (None, None) => DecodePool::inline(),
        };
        HeifContext {
            file: HeifFile::new_writer(limits),
            items: ItemModel::default(),
            tracks: Vec::new(),
            limits,
            pool,
            registry: self.registry,
            decoded_pixels: AtomicU64::new(0),
            primary_set: false,
            premultiplied_items: HashSet::new(),
        }
    }
}

/// Owner of one HEIF file, for reading or writing. Single-threaded by contract; only grid
/// tile decoding fans out internally.
pub struct HeifContext {
    file: HeifFile,
    items: ItemModel,
    tracks: Vec<Track>,
    limits: SecurityLimits,
    pool: DecodePool,
    registry: PluginRegistry,
    decoded_pixels: AtomicU64,
    primary_set: bool,
    /// Writer-side items whose source image had premultiplied alpha; they get a `prem`
    /// reference once their alpha auxiliary is linked.
    premultiplied_items: HashSet<u32>,
}

impl std::fmt::Debug for HeifContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeifContext")
            .field("items", &self.items.items.len())
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

impl Default for HeifContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HeifContext {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HeifContextBuilder {
        HeifContextBuilder::default()
    }

    pub fn register_decoder(&mut self, plugin: Arc<dyn DecoderPlugin>) {
        self.registry.register_decoder(plugin);
    }

    pub fn register_encoder(&mut self, plugin: Arc<dyn EncoderPlugin>) {
        self.registry.register_encoder(plugin);
    }

    // --- reading ---

    pub fn read_from_bytes(&mut self, data: Vec<u8>) -> Result<()> {
        self.read_from_source(Arc::new(MemorySource::new(data)))
    }

    pub fn read_from_source(&mut self, source: Arc<dyn ByteSource>) -> Result<()> {
        let file = HeifFile::parse(source, self.limits)?;

        let items = if file.meta().is_ok() {
            interpret(&file)?
        } else if file.moov().is_none() {
            return Err(Error::missing_box(FourCC::META));
        } else {
            ItemModel::default()
        };

        let mut tracks = Vec::new();
        if let Some(moov) = file.moov() {
            for trak in moov.children_of(FourCC::TRAK) {
                tracks.push(Track::from_trak(trak, &file)?);
            }
        }

        self.file = file;
        self.items = items;
        self.tracks = tracks;
        self.primary_set = self.items.primary_id != 0;
        self.premultiplied_items.clear();
        Ok(())
    }

    pub fn primary_item_id(&self) -> Result<u32> {
        if self.items.primary_id == 0 {
            return Err(Error::missing_box(FourCC::PITM));
        }
        Ok(self.items.primary_id)
    }

    pub fn item(&self, item_id: u32) -> Option<&ImageItem> {
        self.items.item(item_id)
    }

    pub fn primary_item(&self) -> Option<&ImageItem> {
        self.items.primary()
    }

    /// Ids of non-hidden, non-subordinate image items.
    pub fn top_level_image_ids(&self) -> Vec<u32> {
        self.items.top_level_image_ids()
    }

    /// Raw payload bytes of an item (metadata items included).
    pub fn item_data(&self, item_id: u32) -> Result<Vec<u8>> {
        self.file.read_item_data(item_id)
    }

    pub fn entity_groups(&self) -> &[heif_bmff::boxes::EntityGroup] {
        &self.items.entity_groups
    }

    // --- decoding ---

    pub fn decode_item(&self, item_id: u32) -> Result<PixelImage> {
        let decoder = ItemDecoder {
            file: &self.file,
            items: &self.items,
            registry: &self.registry,
            limits: &self.limits,
            pool: &self.pool,
            decoded_pixels: &self.decoded_pixels,
        };
        decoder.decode(item_id)
    }

    pub fn decode_primary_image(&self) -> Result<PixelImage> {
        self.decode_item(self.primary_item_id()?)
    }

    // --- track access ---

    pub fn track_ids(&self) -> Vec<u32> {
        self.tracks.iter().map(Track::id).collect()
    }

    pub fn track(&self, track_id: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == track_id)
    }

    fn track_mut(&mut self, track_id: u32) -> Result<&mut Track> {
        self.tracks
            .iter_mut()
            .find(|t| t.id() == track_id)
            .ok_or_else(|| Error::usage(format!("no track with id {track_id}")))
    }

    /// Tracks that reference `track_id` with the given reference type.
    pub fn find_referring_tracks(&self, track_id: u32, ref_type: FourCC) -> Vec<u32> {
        self.tracks
            .iter()
            .filter(|t| t.referenced_track_ids(ref_type).contains(&track_id))
            .map(Track::id)
            .collect()
    }

    /// Decodes the next sample of a visual track.
    pub fn decode_next_image_sample(&mut self, track_id: u32) -> Result<PixelImage> {
        let file = &self.file;
        let registry = &self.registry;
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == track_id)
            .ok_or_else(|| Error::usage(format!("no track with id {track_id}")))?;
        if !track.is_visual() {
            return Err(Error::usage("track is not a visual track"));
        }
        track.decode_next_image_sample(file, registry)
    }

    /// Returns the next raw sample of a (typically metadata) track.
    pub fn get_next_raw_sequence_sample(&mut self, track_id: u32) -> Result<RawSequenceSample> {
        let file = &self.file;
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == track_id)
            .ok_or_else(|| Error::usage(format!("no track with id {track_id}")))?;
        track.next_raw_sample(file)
    }

    // --- still image writing ---

    /// Encodes one image into a new item, using the registered encoder for `format`.
    pub fn add_image(&mut self, image: &PixelImage, format: CompressionFormat) -> Result<u32> {
        let mut encoder = self.registry.encoder_for(format)?;
        self.add_image_with_encoder(image, encoder.as_mut())
    }

    pub fn add_image_with_encoder(
        &mut self,
        image: &PixelImage,
        encoder: &mut dyn ImageEncoder,
    ) -> Result<u32> {
        let (want_cs, want_chroma) =
            encoder.query_input_colorspace(image.colorspace(), image.chroma());
        if (want_cs, want_chroma) != (image.colorspace(), image.chroma()) {
            return Err(Error::new(
                ErrorKind::ColorProfile,
                Suberror::InvalidPixelFormat,
                format!(
                    "encoder wants {want_cs:?}/{want_chroma:?} input, image is {:?}/{:?}",
                    image.colorspace(),
                    image.chroma()
                ),
            ));
        }

        let format = encoder.format();
        let bitstream = encoder.encode_image(image)?;
        let (coded_w, coded_h) = encoder.query_encoded_size(image.width(), image.height());

        let item_id = self.file.add_item(format.item_type());

        let payload = match format {
            CompressionFormat::Hevc => {
                let (hvcc, payload) = synthesize_hvcc(&bitstream)?;
                self.file
                    .add_property(item_id, HeifBox::new(BoxData::HvcC(hvcc)), true);
                payload
            }
            CompressionFormat::Av1 => {
                let av1c = Av1CBox {
                    monochrome: !image.has_channel(Channel::Cb)
                        && !image.has_channel(Channel::Cr)
                        && !image.has_channel(Channel::R),
                    high_bitdepth: image
                        .plane(Channel::Y)
                        .map(|p| p.bit_depth() > 8)
                        .unwrap_or(false),
                    config_obus: extract_av1_sequence_header(&bitstream).unwrap_or_default(),
                    ..Default::default()
                };
                self.file
                    .add_property(item_id, HeifBox::new(BoxData::Av1C(av1c)), true);
                bitstream
            }
            CompressionFormat::Jpeg | CompressionFormat::Jpeg2000 => bitstream,
            CompressionFormat::Vvc => {
                return Err(Error::unsupported(
                    Suberror::UnsupportedCodec,
                    "VVC encoding is not wired up",
                ));
            }
            CompressionFormat::Uncompressed => {
                return Err(Error::unsupported(
                    Suberror::UnsupportedCodec,
                    "use add_uncompressed_image for unci items",
                ));
            }
        };

        self.add_common_image_properties(item_id, image, coded_w, coded_h);
        self.file.set_item_data(item_id, payload);
        if image.premultiplied_alpha() {
            self.premultiplied_items.insert(item_id);
        }

        if !self.primary_set {
            self.file.set_primary_item(item_id);
            self.primary_set = true;
        }
        Ok(item_id)
    }

    fn add_common_image_properties(
        &mut self,
        item_id: u32,
        image: &PixelImage,
        width: u32,
        height: u32,
    ) {
        self.file.add_property(
            item_id,
            HeifBox::new(BoxData::Ispe(IspeBox { width, height })),
            false,
        );

        let mut bits: Vec<u8> = Vec::new();
        for channel in [Channel::Y, Channel::R, Channel::G, Channel::B, Channel::Cb, Channel::Cr]
        {
            if let Some(plane) = image.plane(channel) {
                bits.push(plane.bit_depth());
            }
        }
        if !bits.is_empty() {
            self.file.add_property(
                item_id,
                HeifBox::new(BoxData::Pixi(PixiBox {
                    bits_per_channel: bits,
                })),
                false,
            );
        }

        if let Some(profile) = image.color_profile() {
            self.file.add_property(
                item_id,
                HeifBox::new(BoxData::Colr(heif_bmff::boxes::ColrBox {
                    profile: profile.clone(),
                })),
                false,
            );
        }
        if let Some(clli) = image.content_light_level() {
            self.file.add_property(
                item_id,
                HeifBox::new(BoxData::Clli(heif_bmff::boxes::ClliBox { clli })),
                false,
            );
        }
        if let Some(mdcv) = image.mastering_display_colour_volume() {
            self.file.add_property(
                item_id,
                HeifBox::new(BoxData::Mdcv(heif_bmff::boxes::MdcvBox { mdcv })),
                false,
            );
        }
        if let Some(ratio) = image.pixel_aspect_ratio() {
            self.file.add_property(
                item_id,
                HeifBox::new(BoxData::Pasp(heif_bmff::boxes::PaspBox { ratio })),
                false,
            );
        }
    }

    pub fn set_primary_item(&mut self, item_id: u32) {
        self.file.set_primary_item(item_id);
        self.primary_set = true;
    }

    /// Marks `thumb_id` as a thumbnail of `master_id`.
    pub fn assign_thumbnail(&mut self, thumb_id: u32, master_id: u32) {
        self.file
            .add_item_reference(thumb_id, FourCC::THMB, &[master_id]);
    }

    /// Attaches `aux_id` as an auxiliary image of `master_id` with the given auxC URN.
    pub fn link_auxiliary_image(&mut self, aux_id: u32, master_id: u32, aux_type: &str) {
        self.file
            .add_item_reference(aux_id, FourCC::AUXL, &[master_id]);
        self.file.add_property(
            aux_id,
            HeifBox::new(BoxData::AuxC(heif_bmff::boxes::AuxCBox {
                aux_type: aux_type.to_string(),
                aux_subtypes: Vec::new(),
            })),
            true,
        );
        // A premultiplied master records a `prem` edge toward its alpha image.
        if heif_bmff::boxes::AUX_TYPE_ALPHA.contains(&aux_type)
            && self.premultiplied_items.contains(&master_id)
        {
            self.file
                .add_item_reference(master_id, FourCC::PREM, &[aux_id]);
        }
    }

    /// Adds a `grid` derived image over previously added tiles, in row-major order.
    pub fn add_grid_image(
        &mut self,
        tile_ids: &[u32],
        rows: u16,
        columns: u16,
        output_width: u32,
        output_height: u32,
    ) -> Result<u32> {
        if tile_ids.len() as u32 != rows as u32 * columns as u32 {
            return Err(Error::usage("tile count must equal rows * columns"));
        }
        let grid = crate::item::derived::ImageGrid {
            rows,
            columns,
            output_width,
            output_height,
        };
        let item_id = self.file.add_item(FourCC::GRID);
        self.file.set_item_data(item_id, grid.to_bytes());
        self.file.add_item_reference(item_id, FourCC::DIMG, tile_ids);
        self.file.add_property(
            item_id,
            HeifBox::new(BoxData::Ispe(IspeBox {
                width: output_width,
                height: output_height,
            })),
            false,
        );
        for &tile in tile_ids {
            if let Some(infe) = self.file.infe_mut(tile) {
                infe.hidden = true;
            }
        }
        Ok(item_id)
    }

    /// Adds an `iovl` derived image compositing previously added images.
    pub fn add_overlay_image(
        &mut self,
        source_ids: &[u32],
        offsets: &[(i32, i32)],
        canvas_width: u32,
        canvas_height: u32,
        background_color: [u16; 4],
    ) -> Result<u32> {
        if source_ids.len() != offsets.len() || source_ids.is_empty() {
            return Err(Error::usage("overlay needs one offset per source image"));
        }
        let overlay = crate::item::derived::ImageOverlay {
            background_color,
            canvas_width,
            canvas_height,
            offsets: offsets.to_vec(),
        };
        let item_id = self.file.add_item(FourCC::IOVL);
        self.file.set_item_data(item_id, overlay.to_bytes());
        self.file
            .add_item_reference(item_id, FourCC::DIMG, source_ids);
        self.file.add_property(
            item_id,
            HeifBox::new(BoxData::Ispe(IspeBox {
                width: canvas_width,
                height: canvas_height,
            })),
            false,
        );
        Ok(item_id)
    }

    /// Adds an `iden` derived image referencing `source_id`.
    pub fn add_identity_image(&mut self, source_id: u32, width: u32, height: u32) -> Result<u32> {
        let item_id = self.file.add_item(FourCC::IDEN);
        self.file
            .add_item_reference(item_id, FourCC::DIMG, &[source_id]);
        self.file.add_property(
            item_id,
            HeifBox::new(BoxData::Ispe(IspeBox { width, height })),
            false,
        );
        Ok(item_id)
    }

    /// Associates an `irot` transform property with an item.
    pub fn add_rotation(&mut self, item_id: u32, quarter_turns_ccw: u8) {
        self.file.add_property(
            item_id,
            HeifBox::new(BoxData::Irot(heif_bmff::boxes::IrotBox {
                quarter_turns: quarter_turns_ccw & 3,
            })),
            true,
        );
    }

    pub fn add_mirror(&mut self, item_id: u32, axis: heif_image::MirrorAxis) {
        self.file.add_property(
            item_id,
            HeifBox::new(BoxData::Imir(heif_bmff::boxes::ImirBox { axis })),
            true,
        );
    }

    /// Attaches Exif metadata to an image item.
    pub fn add_exif_metadata(&mut self, image_id: u32, exif: &[u8]) -> u32 {
        let item_id = self.file.add_item(FourCC::EXIF);
        // 4-byte offset to the TIFF header, then the Exif payload.
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(exif);
        self.file.set_item_data(item_id, payload);
        self.file
            .add_item_reference(item_id, FourCC::CDSC, &[image_id]);
        item_id
    }

    /// Attaches XMP metadata (as a `mime` item) to an image item.
    pub fn add_xmp_metadata(&mut self, image_id: u32, xmp: &[u8]) -> u32 {
        let item_id = self.file.add_item(FourCC::MIME);
        if let Some(infe) = self.file.infe_mut(item_id) {
            infe.content_type = "application/rdf+xml".to_string();
        }
        self.file.set_item_data(item_id, xmp.to_vec());
        self.file
            .add_item_reference(item_id, FourCC::CDSC, &[image_id]);
        item_id
    }

    // --- sequence writing ---

    fn allocate_track_id(&mut self) -> u32 {
        let moov = self.file.ensure_moov();
        let mvhd = moov
            .child_mut(FourCC::MVHD)
            .and_then(|b| b.as_mvhd_mut())
            .expect("moov skeleton always has mvhd");
        let id = mvhd.next_track_id;
        mvhd.next_track_id = id + 1;
        id
    }

    pub fn add_visual_sequence_track(
        &mut self,
        width: u16,
        height: u16,
        options: TrackOptions,
    ) -> u32 {
        let id = self.allocate_track_id();
        self.tracks.push(Track::new_visual(id, width, height, options));
        id
    }

    pub fn add_uri_metadata_sequence_track(&mut self, uri: &str, options: TrackOptions) -> u32 {
        let id = self.allocate_track_id();
        self.tracks
            .push(Track::new_uri_metadata(id, uri.to_string(), options));
        id
    }

    pub fn add_track_reference(&mut self, from_track: u32, ref_type: FourCC, to_track: u32) -> Result<()> {
        self.track_mut(from_track)?
            .add_reference_to_track(ref_type, to_track);
        Ok(())
    }

    /// Encodes one image as the next sample of a visual track.
    #[allow(clippy::too_many_arguments)]
    pub fn encode_sequence_image(
        &mut self,
        track_id: u32,
        image: &PixelImage,
        format: CompressionFormat,
        duration: u32,
        is_sync_sample: bool,
        tai: Option<&TaiTimestamp>,
        gimi_content_id: Option<&str>,
    ) -> Result<()> {
        let mut encoder = self.registry.encoder_for(format)?;
        let bitstream = encoder.encode_image(image)?;
        let (coded_w, coded_h) = encoder.query_encoded_size(image.width(), image.height());

        let entry_fourcc = format.sample_entry_type();
        let (payload, config_child) = match format {
            CompressionFormat::Hevc => {
                let (hvcc, payload) = synthesize_hvcc(&bitstream)?;
                (payload, Some(HeifBox::new(BoxData::HvcC(hvcc))))
            }
            CompressionFormat::Av1 => {
                let av1c = Av1CBox {
                    config_obus: extract_av1_sequence_header(&bitstream).unwrap_or_default(),
                    ..Default::default()
                };
                (bitstream, Some(HeifBox::new(BoxData::Av1C(av1c))))
            }
            _ => (bitstream, None),
        };

        let needs_chunk = self.track_mut(track_id)?.needs_new_chunk(entry_fourcc);
        if needs_chunk {
            let mut entry = HeifBox::with_fourcc(
                entry_fourcc,
                BoxData::VisualSampleEntry(VisualSampleEntryBox {
                    width: coded_w as u16,
                    height: coded_h as u16,
                    ..Default::default()
                }),
            );
            if let Some(config) = config_child {
                entry.children.push(config);
            }
            self.track_mut(track_id)?.add_chunk_with_entry(entry);
        }

        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == track_id)
            .expect("track existence was checked above");
        let file = &mut self.file;
        track.write_sample_data(file, &payload, duration, is_sync_sample, tai, gimi_content_id)
    }

    /// Appends one raw sample to a metadata track.
    pub fn add_raw_sequence_sample(
        &mut self,
        track_id: u32,
        data: &[u8],
        duration: u32,
        tai: Option<&TaiTimestamp>,
        gimi_content_id: Option<&str>,
    ) -> Result<()> {
        let uri = self
            .track(track_id)
            .and_then(|t| t.urim_sample_entry_uri())
            .map(str::to_string);
        let needs_chunk = self.track_mut(track_id)?.needs_new_chunk(FourCC::URIM);
        if needs_chunk {
            let mut entry = HeifBox::with_fourcc(
                FourCC::URIM,
                BoxData::Urim(UrimBox::default()),
            );
            entry.append_child(HeifBox::new(BoxData::Uri(UriBox {
                uri: uri.unwrap_or_default(),
            })));
            self.track_mut(track_id)?.add_chunk_with_entry(entry);
        }

        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == track_id)
            .expect("track existence was checked above");
        track.write_sample_data(&mut self.file, data, duration, false, tai, gimi_content_id)
    }

    /// Finishes a track: flushes auxiliary data and computes its duration.
    pub fn finalize_track(&mut self, track_id: u32) -> Result<()> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == track_id)
            .ok_or_else(|| Error::usage(format!("no track with id {track_id}")))?;
        track.finalize(&mut self.file);
        Ok(())
    }

    // --- serialization ---

    /// Serializes the file: `ftyp` + `meta` (+ `moov`) + `mdat` with back-patched offsets.
    pub fn write_to_vec(&mut self) -> Result<Vec<u8>> {
        self.materialize_parsed_payloads()?;

        // Finalize writer-created tracks that were not finalized explicitly.
        let writer_tracks: Vec<usize> = (0..self.tracks.len())
            .filter(|&i| self.tracks[i].is_writer_created())
            .collect();
        for &i in &writer_tracks {
            if !self.tracks[i].is_finalized() {
                self.tracks[i].finalize(&mut self.file);
            }
        }

        if !writer_tracks.is_empty() {
            let movie_timescale = {
                let moov = self.file.ensure_moov();
                moov.child(FourCC::MVHD)
                    .and_then(|b| b.as_mvhd())
                    .map(|m| m.timescale)
                    .unwrap_or(1000)
            };
            let mut movie_duration = 0u64;
            for &i in &writer_tracks {
                let duration = self.tracks[i].duration_in(movie_timescale);
                self.tracks[i].set_duration_in_movie_units(duration);
                movie_duration = movie_duration.max(duration);
            }
            let writer_ids: Vec<u32> =
                writer_tracks.iter().map(|&i| self.tracks[i].id()).collect();
            let traks: Vec<HeifBox> = writer_tracks
                .iter()
                .map(|&i| self.tracks[i].build_trak())
                .collect();
            let moov = self.file.ensure_moov();
            if let Some(mvhd) = moov.child_mut(FourCC::MVHD).and_then(|b| b.as_mvhd_mut()) {
                mvhd.duration = mvhd.duration.max(movie_duration);
            }
            // Writer-created traks are rebuilt from scratch on every write; parsed ones stay.
            moov.children.retain(|c| {
                c.fourcc() != FourCC::TRAK
                    || c.child(FourCC::TKHD)
                        .and_then(|b| b.as_tkhd())
                        .map(|tkhd| !writer_ids.contains(&tkhd.track_id))
                        .unwrap_or(true)
            });
            moov.children.extend(traks);
        }

        self.file.write()
    }

    /// Copies payloads of a parsed file into the pending write buffers so the rewritten file
    /// is self-contained: item data in item-id order, then per-track chunk data followed by
    /// that track's auxiliary-info blocks.
    fn materialize_parsed_payloads(&mut self) -> Result<()> {
        let parsed_item_ids: Vec<u32> = self
            .file
            .iloc()
            .map(|iloc| iloc.items.iter().map(|i| i.item_id).collect())
            .unwrap_or_default();
        for item_id in parsed_item_ids {
            if !self.file.has_pending_item_data(item_id) {
                let data = self.file.read_item_data(item_id)?;
                self.file.set_item_data(item_id, data);
            }
        }

        // Chunk-offset tables get relative offsets here; `HeifFile::write` rebases them to
        // the final absolute positions.
        let mut per_track: Vec<(Vec<u64>, Vec<((FourCC, u32), u64)>)> = Vec::new();
        for track_idx in 0..self.tracks.len() {
            if self.tracks[track_idx].is_writer_created() {
                per_track.push((Vec::new(), Vec::new()));
                continue;
            }
            let chunk_ranges = self.tracks[track_idx].chunk_byte_ranges();
            let mut new_offsets = Vec::with_capacity(chunk_ranges.len());
            for (offset, size) in chunk_ranges {
                let mut data = Vec::new();
                self.file.read_file_range(offset, size, &mut data)?;
                new_offsets.push(self.file.append_sequence_data(&data));
            }
            let aux_streams = self.tracks[track_idx].materialize_aux_data(&self.file)?;
            let mut aux_offsets = Vec::with_capacity(aux_streams.len());
            for (key, bytes) in aux_streams {
                let pos = self.file.append_sequence_data(&bytes);
                aux_offsets.push((key, pos));
            }
            per_track.push((new_offsets, aux_offsets));
        }

        // Track-level meta items of parsed tracks (GIMI content ids) are copied too, so their
        // iloc extents become sequence-relative like everything else under moov.
        let mut trak_iloc_payloads: Vec<Vec<Vec<u8>>> = Vec::new();
        if let Some(moov) = self.file.top_level_box(FourCC::MOOV) {
            let mut trak_index = 0usize;
            for child in &moov.children {
                if child.fourcc() != FourCC::TRAK {
                    continue;
                }
                let mut payloads = Vec::new();
                let skip = per_track
                    .get(trak_index)
                    .map(|(offsets, _)| offsets.is_empty())
                    .unwrap_or(true);
                if !skip {
                    crate::file::visit(child, &mut |node| {
                        if let BoxData::Iloc(iloc) = &node.data {
                            for item in &iloc.items {
                                for extent in &item.extents {
                                    let mut data = Vec::new();
                                    let _ = self.file.read_file_range(
                                        item.base_offset + extent.offset,
                                        extent.length,
                                        &mut data,
                                    );
                                    payloads.push(data);
                                }
                            }
                        }
                    });
                }
                trak_iloc_payloads.push(payloads);
                trak_index += 1;
            }
        }
        let trak_iloc_offsets: Vec<Vec<u64>> = trak_iloc_payloads
            .into_iter()
            .map(|payloads| {
                payloads
                    .into_iter()
                    .map(|data| self.file.append_sequence_data(&data))
                    .collect()
            })
            .collect();

        if let Some(moov) = self
            .file
            .top_level
            .iter_mut()
            .find(|b| b.fourcc() == FourCC::MOOV)
        {
            let mut trak_index = 0usize;
            for child in &mut moov.children {
                if child.fourcc() != FourCC::TRAK {
                    continue;
                }
                if let Some((new_offsets, aux_offsets)) = per_track.get(trak_index) {
                    if !new_offsets.is_empty() {
                        let iloc_offsets =
                            trak_iloc_offsets.get(trak_index).cloned().unwrap_or_default();
                        let mut next_extent = 0usize;
                        visit_mut(child, &mut |node| match &mut node.data {
                            BoxData::Stco(stco) => stco.offsets = new_offsets.clone(),
                            BoxData::Saio(saio) => {
                                if let Some((_, pos)) = aux_offsets
                                    .iter()
                                    .find(|(key, _)| Some(*key) == saio.aux_info_type)
                                {
                                    saio.offsets = vec![*pos];
                                }
                            }
                            BoxData::Iloc(iloc) => {
                                for item in &mut iloc.items {
                                    item.base_offset = 0;
                                    for extent in &mut item.extents {
                                        if next_extent < iloc_offsets.len() {
                                            extent.offset = iloc_offsets[next_extent];
                                            next_extent += 1;
                                        }
                                    }
                                }
                            }
                            _ => {}
                        });
                    }
                }
                trak_index += 1;
            }
        }
        Ok(())
    }
}

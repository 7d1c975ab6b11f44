//! The logical sequence graph: tracks, chunks, sample tables and sample auxiliary
//! information, for both reading and writing.

use heif_bmff::boxes::{
    BoxData, ConstructionMethod, HdlrBox, HeifBox, IlocBox, IlocExtent, IlocItem, InfeBox,
    ItaiBox, MdhdBox, SaioBox, SaizBox, StcoBox, StscBox, StsdBox, StssBox, StszBox, SttsBox,
    TaicBox, TkhdBox, TrefBox,
};
use heif_bmff::{Error, ErrorKind, FourCC, Result, Suberror};
use heif_image::{PixelImage, TaiClockInfo, TaiTimestamp};

use crate::codecs::{
    length_prefixed_to_annexb, CompressionFormat, ImageDecoder, PluginRegistry,
};
use crate::file::HeifFile;

/// URI that marks the `uri ` item carrying a GIMI track-level content id.
pub const GIMI_TRACK_CONTENT_ID_URI: &str = "urn:uuid:15beb8e4-944d-5fc6-a3dd-cb5a7e655c73";

/// Presence policy for per-sample auxiliary information on the write side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleAuxPresence {
    #[default]
    None,
    Optional,
    Mandatory,
}

/// Options for newly created sequence tracks.
#[derive(Debug, Clone)]
pub struct TrackOptions {
    pub timescale: u32,
    /// Write sample-aux-info blocks between chunks instead of one trailing block.
    pub interleaved_sample_aux_infos: bool,
    pub with_tai_timestamps: SampleAuxPresence,
    pub tai_clock_info: Option<TaiClockInfo>,
    pub with_gimi_content_ids: SampleAuxPresence,
    pub gimi_track_content_id: Option<String>,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            timescale: 90000,
            interleaved_sample_aux_infos: false,
            with_tai_timestamps: SampleAuxPresence::None,
            tai_clock_info: None,
            with_gimi_content_ids: SampleAuxPresence::None,
            gimi_track_content_id: None,
        }
    }
}

/// One raw sample of a metadata track, with its per-sample annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSequenceSample {
    pub data: Vec<u8>,
    pub duration: u32,
    pub tai_timestamp: Option<TaiTimestamp>,
    pub gimi_content_id: Option<String>,
}

/// A contiguous run of samples sharing one sample description. Lazily holds the decoder.
struct Chunk {
    /// 1-based index into the stsd entries.
    sample_description_index: u32,
    /// 0-based inclusive sample range.
    first_sample: u32,
    last_sample: u32,
    offset: u64,
    decoder: Option<Box<dyn ImageDecoder>>,
}

/// Reader for one `saiz`/`saio` pair, with offsets expanded to per-sample positions.
struct SampleAuxReader {
    saiz: SaizBox,
    sample_offsets: Vec<u64>,
}

impl SampleAuxReader {
    fn new(saiz: SaizBox, saio: SaioBox, chunks: &[Chunk]) -> Result<Self> {
        let sample_count = saiz.sample_count;
        let mut sample_offsets = Vec::with_capacity(sample_count as usize);

        if saio.offsets.len() == 1 {
            // One contiguous block for all samples.
            let mut offset = saio.offsets[0];
            for i in 0..sample_count {
                sample_offsets.push(offset);
                offset += saiz.sample_info_size(i) as u64;
            }
        } else if saio.offsets.len() == sample_count as usize {
            sample_offsets = saio.offsets.clone();
        } else if saio.offsets.len() == chunks.len() {
            // One interleaved block per chunk.
            for (chunk, &block) in chunks.iter().zip(&saio.offsets) {
                let mut offset = block;
                for i in chunk.first_sample..=chunk.last_sample {
                    sample_offsets.push(offset);
                    offset += saiz.sample_info_size(i) as u64;
                }
            }
        } else {
            return Err(Error::unsupported(
                Suberror::UnsupportedDataVersion,
                "saio offset count matches neither samples nor chunks",
            ));
        }

        if sample_offsets.len() != sample_count as usize {
            return Err(Error::parse(
                "saiz sample count disagrees with the track sample count",
            ));
        }

        Ok(Self {
            saiz,
            sample_offsets,
        })
    }

    fn sample_info(&self, file: &HeifFile, index: u32) -> Result<Vec<u8>> {
        let size = self.saiz.sample_info_size(index) as u64;
        if size == 0 {
            return Ok(Vec::new());
        }
        let Some(&offset) = self.sample_offsets.get(index as usize) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        file.read_file_range(offset, size, &mut out)?;
        Ok(out)
    }
}

/// Write-side accumulator for one sample-aux-info stream.
struct SampleAuxHelper {
    aux_type: FourCC,
    saiz: SaizBox,
    offsets: Vec<u64>,
    pending: Vec<u8>,
    interleaved: bool,
}

impl SampleAuxHelper {
    fn new(aux_type: FourCC, interleaved: bool) -> Self {
        Self {
            aux_type,
            saiz: SaizBox::with_type(aux_type, 0),
            offsets: Vec::new(),
            pending: Vec::new(),
            interleaved,
        }
    }

    fn add_sample_info(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > 0xff {
            return Err(Error::new(
                ErrorKind::EncoderPlugin,
                Suberror::Unspecified,
                "sample auxiliary information exceeds 255 bytes",
            ));
        }
        self.saiz.add_sample_size(data.len() as u8);
        self.pending.extend_from_slice(data);
        Ok(())
    }

    fn add_nonpresent_sample(&mut self) {
        self.saiz.add_nonpresent_sample();
    }

    /// Flushes the pending block between chunks, when interleaving is on.
    fn write_interleaved(&mut self, file: &mut HeifFile) {
        if self.interleaved && !self.pending.is_empty() {
            let pos = file.append_sequence_data(&self.pending);
            self.offsets.push(pos);
            self.pending.clear();
        }
    }

    /// Writes any remaining data and returns the finished `saiz`/`saio` pair.
    fn finish(mut self, file: &mut HeifFile) -> (SaizBox, SaioBox) {
        if !self.pending.is_empty() {
            let pos = file.append_sequence_data(&self.pending);
            self.offsets.push(pos);
            self.pending.clear();
        }
        let saio = SaioBox {
            aux_info_type: Some((self.aux_type, 0)),
            offsets: self.offsets,
            wide_offsets: false,
        };
        (self.saiz, saio)
    }
}

/// A sequence track: sample tables plus the iteration and writing state.
pub struct Track {
    id: u32,
    handler: FourCC,
    width: u16,
    height: u16,
    tkhd: TkhdBox,
    mdhd: MdhdBox,
    tref: TrefBox,
    stsd_entries: Vec<HeifBox>,
    stts: SttsBox,
    stsc: StscBox,
    stsz: StszBox,
    stco: StcoBox,
    stss: StssBox,
    has_stss: bool,
    chunks: Vec<Chunk>,

    // Iteration state: `fresh` is (0, 0); `exhausted` is current_chunk == chunks.len().
    current_chunk: usize,
    next_sample: u32,

    aux_reader_tai: Option<SampleAuxReader>,
    aux_reader_content_ids: Option<SampleAuxReader>,

    options: TrackOptions,
    aux_helper_tai: Option<SampleAuxHelper>,
    aux_helper_content_ids: Option<SampleAuxHelper>,
    gimi_track_content_id: Option<String>,
    gimi_id_location: Option<(u64, u64)>,
    urim_uri: Option<String>,
    finished_aux_boxes: Vec<HeifBox>,
    writer_created: bool,
    finalized: bool,
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("handler", &self.handler)
            .field("chunks", &self.chunks.len())
            .field("samples", &self.stsz.sample_count)
            .finish()
    }
}

impl Track {
    // --- reading ---

    pub(crate) fn from_trak(trak: &HeifBox, file: &HeifFile) -> Result<Track> {
        let tkhd = trak
            .child(FourCC::TKHD)
            .and_then(|b| b.as_tkhd())
            .ok_or_else(|| Error::missing_box(FourCC::TKHD))?
            .clone();
        let mdia = trak
            .child(FourCC::MDIA)
            .ok_or_else(|| Error::missing_box(FourCC::MDIA))?;
        let hdlr = mdia
            .child(FourCC::HDLR)
            .and_then(|b| b.as_hdlr())
            .ok_or_else(|| Error::missing_box(FourCC::HDLR))?;
        let mdhd = mdia
            .child(FourCC::MDHD)
            .and_then(|b| b.as_mdhd())
            .ok_or_else(|| Error::missing_box(FourCC::MDHD))?
            .clone();
        let minf = mdia
            .child(FourCC::MINF)
            .ok_or_else(|| Error::missing_box(FourCC::MINF))?;
        let stbl = minf
            .child(FourCC::STBL)
            .ok_or_else(|| Error::missing_box(FourCC::STBL))?;

        let stsd_node = stbl
            .child(FourCC::STSD)
            .ok_or_else(|| Error::missing_box(FourCC::STSD))?;
        let stsd_entries: Vec<HeifBox> = stsd_node.children.clone();
        let stsc = required_table(stbl, FourCC::STSC, HeifBox::as_stsc)?;
        let stco = stbl
            .child(FourCC::STCO)
            .or_else(|| stbl.child(FourCC::CO64))
            .and_then(|b| b.as_stco())
            .ok_or_else(|| Error::missing_box(FourCC::STCO))?
            .clone();
        let stsz = required_table(stbl, FourCC::STSZ, HeifBox::as_stsz)?;
        let stts = stbl
            .child(FourCC::STTS)
            .and_then(|b| b.as_stts())
            .cloned()
            .unwrap_or_default();
        let (stss, has_stss) = match stbl.child(FourCC::STSS).and_then(|b| b.as_stss()) {
            Some(stss) => (stss.clone(), true),
            None => (StssBox::default(), false),
        };

        // Materialize chunks from the chunk-offset and sample-to-chunk tables.
        let mut chunks = Vec::with_capacity(stco.offsets.len());
        let mut current_sample = 0u32;
        for (chunk_idx, &offset) in stco.offsets.iter().enumerate() {
            let entry = stsc.entry_for_chunk(chunk_idx as u32 + 1).ok_or_else(|| {
                Error::parse(format!("no stsc run covers chunk {}", chunk_idx + 1))
            })?;
            if entry.sample_description_index == 0
                || entry.sample_description_index as usize > stsd_entries.len()
            {
                return Err(Error::parse("stsc sample description index out of range"));
            }
            if entry.samples_per_chunk == 0 {
                return Err(Error::parse("stsc declares an empty chunk"));
            }
            chunks.push(Chunk {
                sample_description_index: entry.sample_description_index,
                first_sample: current_sample,
                last_sample: current_sample + entry.samples_per_chunk - 1,
                offset,
                decoder: None,
            });
            current_sample += entry.samples_per_chunk;
        }

        if current_sample != stsz.sample_count {
            return Err(Error::parse(format!(
                "stsc maps {} samples but stsz declares {}",
                current_sample, stsz.sample_count
            )));
        }
        if !stts.entries.is_empty() && stts.sample_count() != stsz.sample_count as u64 {
            return Err(Error::parse(
                "stts sample count disagrees with stsz sample count",
            ));
        }

        // Sample auxiliary information streams, keyed by (type, parameter).
        let saiz_boxes: Vec<&SaizBox> = stbl
            .children_of(FourCC::SAIZ)
            .filter_map(|b| b.as_saiz())
            .collect();
        let saio_boxes: Vec<&SaioBox> = stbl
            .children_of(FourCC::SAIO)
            .filter_map(|b| b.as_saio())
            .collect();
        let mut aux_reader_tai = None;
        let mut aux_reader_content_ids = None;
        for saiz in saiz_boxes {
            let Some(key) = saiz.aux_info_type else {
                continue;
            };
            let Some(saio) = saio_boxes.iter().find(|s| s.aux_info_type == Some(key)) else {
                continue;
            };
            let reader = SampleAuxReader::new(saiz.clone(), (*saio).clone(), &chunks)?;
            if key.0 == FourCC::STAI {
                aux_reader_tai = Some(reader);
            } else if key.0 == FourCC::SUID {
                aux_reader_content_ids = Some(reader);
            }
        }

        // Track-level GIMI content id from the trak's own meta box.
        let gimi_track_content_id = read_track_content_id(trak, file);

        let urim_uri = stsd_entries
            .iter()
            .find(|e| e.fourcc() == FourCC::URIM)
            .and_then(|urim| urim.child(FourCC::URI))
            .and_then(|b| b.as_uri())
            .map(|uri| uri.uri.clone());

        let (mut width, mut height) = (tkhd.pixel_width(), tkhd.pixel_height());
        if width == 0 || height == 0 {
            if let Some(entry) = stsd_entries
                .iter()
                .find_map(|e| e.as_visual_sample_entry())
            {
                width = entry.width;
                height = entry.height;
            }
        }

        Ok(Track {
            id: tkhd.track_id,
            handler: hdlr.handler_type,
            width,
            height,
            tkhd,
            mdhd,
            tref: trak
                .child(FourCC::TREF)
                .and_then(|b| b.as_tref())
                .cloned()
                .unwrap_or_default(),
            stsd_entries,
            stts,
            stsc,
            stsz,
            stco,
            stss,
            has_stss,
            chunks,
            current_chunk: 0,
            next_sample: 0,
            aux_reader_tai,
            aux_reader_content_ids,
            options: TrackOptions::default(),
            aux_helper_tai: None,
            aux_helper_content_ids: None,
            gimi_track_content_id,
            gimi_id_location: None,
            urim_uri: urim_uri.clone(),
            finished_aux_boxes: Vec::new(),
            writer_created: false,
            finalized: false,
        })
    }

    // --- writer construction ---

    pub(crate) fn new_visual(id: u32, width: u16, height: u16, options: TrackOptions) -> Track {
        let mut track = Track::new_empty(id, FourCC::PICT, options);
        track.width = width;
        track.height = height;
        track.tkhd.set_resolution(width, height);
        track
    }

    pub(crate) fn new_uri_metadata(id: u32, uri: String, options: TrackOptions) -> Track {
        let mut track = Track::new_empty(id, FourCC::META, options);
        track.urim_uri = Some(uri);
        track
    }

    fn new_empty(id: u32, handler: FourCC, options: TrackOptions) -> Track {
        let mut tkhd = TkhdBox {
            track_id: id,
            ..Default::default()
        };
        tkhd.volume = 0;
        let mdhd = MdhdBox {
            timescale: options.timescale,
            ..Default::default()
        };

        let interleaved = options.interleaved_sample_aux_infos;
        let aux_helper_tai = if options.with_tai_timestamps != SampleAuxPresence::None {
            Some(SampleAuxHelper::new(FourCC::STAI, interleaved))
        } else {
            None
        };
        let aux_helper_content_ids = if options.with_gimi_content_ids != SampleAuxPresence::None {
            Some(SampleAuxHelper::new(FourCC::SUID, interleaved))
        } else {
            None
        };

        Track {
            id,
            handler,
            width: 0,
            height: 0,
            tkhd,
            mdhd,
            tref: TrefBox::default(),
            stsd_entries: Vec::new(),
            stts: SttsBox::default(),
            stsc: StscBox::default(),
            stsz: StszBox::default(),
            stco: StcoBox::default(),
            stss: StssBox::default(),
            has_stss: false,
            chunks: Vec::new(),
            current_chunk: 0,
            next_sample: 0,
            aux_reader_tai: None,
            aux_reader_content_ids: None,
            gimi_track_content_id: options.gimi_track_content_id.clone(),
            options,
            aux_helper_tai,
            aux_helper_content_ids,
            gimi_id_location: None,
            urim_uri: None,
            finished_aux_boxes: Vec::new(),
            writer_created: true,
            finalized: false,
        }
    }

    // --- common accessors ---

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn handler(&self) -> FourCC {
        self.handler
    }

    pub fn is_visual(&self) -> bool {
        self.handler == FourCC::PICT || self.handler == FourCC::VIDE
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn timescale(&self) -> u32 {
        self.mdhd.timescale
    }

    /// Track duration in media (timescale) units.
    pub fn duration_in_media_units(&self) -> u64 {
        self.mdhd.duration
    }

    pub fn sample_count(&self) -> u32 {
        self.stsz.sample_count
    }

    pub fn urim_sample_entry_uri(&self) -> Option<&str> {
        self.urim_uri.as_deref()
    }

    pub fn gimi_track_content_id(&self) -> Option<&str> {
        self.gimi_track_content_id.as_deref()
    }

    pub fn referenced_track_ids(&self, ref_type: FourCC) -> &[u32] {
        self.tref.references_of_type(ref_type)
    }

    pub fn add_reference_to_track(&mut self, ref_type: FourCC, to_track_id: u32) {
        self.tref.add_references(ref_type, to_track_id);
    }

    pub fn end_of_sequence_reached(&self) -> bool {
        match self.chunks.last() {
            Some(chunk) => self.next_sample > chunk.last_sample,
            None => true,
        }
    }

    // --- iteration ---

    /// Advances to the chunk containing the next sample, or fails with `EndOfSequence`.
    fn seek_chunk(&mut self) -> Result<usize> {
        loop {
            if self.current_chunk >= self.chunks.len() {
                return Err(Error::end_of_sequence());
            }
            if self.next_sample <= self.chunks[self.current_chunk].last_sample {
                return Ok(self.current_chunk);
            }
            self.current_chunk += 1;
        }
    }

    /// Byte range of the 0-based sample, derived from the chunk offset and the sizes of the
    /// samples before it within the chunk.
    fn sample_range(&self, chunk_idx: usize, sample: u32) -> (u64, u32) {
        let chunk = &self.chunks[chunk_idx];
        let mut offset = chunk.offset;
        for s in chunk.first_sample..sample {
            offset += self.stsz.sample_size(s) as u64;
        }
        (offset, self.stsz.sample_size(sample))
    }

    fn read_sample_annotations(
        &self,
        file: &HeifFile,
        sample: u32,
    ) -> Result<(Option<TaiTimestamp>, Option<String>)> {
        let tai = match &self.aux_reader_tai {
            Some(reader) => {
                let data = reader.sample_info(file, sample)?;
                if data.is_empty() {
                    None
                } else {
                    Some(ItaiBox::decode_packet(&data)?)
                }
            }
            None => None,
        };
        let content_id = match &self.aux_reader_content_ids {
            Some(reader) => {
                let data = reader.sample_info(file, sample)?;
                if data.is_empty() {
                    None
                } else {
                    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                    Some(String::from_utf8_lossy(&data[..end]).into_owned())
                }
            }
            None => None,
        };
        Ok((tai, content_id))
    }

    /// Returns the next raw sample of this track, advancing the cursor.
    pub fn next_raw_sample(&mut self, file: &HeifFile) -> Result<RawSequenceSample> {
        let chunk_idx = self.seek_chunk()?;
        let sample = self.next_sample;
        let (offset, size) = self.sample_range(chunk_idx, sample);

        let mut data = Vec::new();
        file.read_file_range(offset, size as u64, &mut data)?;

        let duration = self.stts.sample_duration(sample);
        let (tai_timestamp, gimi_content_id) = self.read_sample_annotations(file, sample)?;

        self.next_sample += 1;
        Ok(RawSequenceSample {
            data,
            duration,
            tai_timestamp,
            gimi_content_id,
        })
    }

    /// Decodes the next image sample of a visual track, advancing the cursor.
    pub fn decode_next_image_sample(
        &mut self,
        file: &HeifFile,
        registry: &PluginRegistry,
    ) -> Result<PixelImage> {
        let chunk_idx = self.seek_chunk()?;
        let sample = self.next_sample;
        let (offset, size) = self.sample_range(chunk_idx, sample);

        let mut data = Vec::new();
        file.read_file_range(offset, size as u64, &mut data)?;

        let entry_index = self.chunks[chunk_idx].sample_description_index as usize - 1;
        let entry = self.stsd_entries.get(entry_index).cloned().ok_or_else(|| {
            Error::parse("chunk references a missing sample description entry")
        })?;

        if self.chunks[chunk_idx].decoder.is_none() {
            self.chunks[chunk_idx].decoder = Some(new_decoder_for_entry(&entry, registry)?);
        }
        let decoder = self.chunks[chunk_idx].decoder.as_mut().unwrap();

        let payload = if decoder.needs_start_codes() {
            let length_size = entry
                .child(FourCC::HVCC)
                .and_then(|b| b.as_hvcc())
                .map(|h| h.length_size)
                .or_else(|| {
                    entry
                        .child(FourCC::VVCC)
                        .and_then(|b| b.as_vvcc())
                        .map(|v| v.length_size)
                })
                .unwrap_or(4);
            length_prefixed_to_annexb(&data, length_size)?
        } else {
            data
        };
        decoder.push_data(&payload)?;
        let mut image = decoder.decode_image()?;

        image.set_sample_duration(self.stts.sample_duration(sample));
        let (tai, content_id) = self.read_sample_annotations(file, sample)?;
        image.set_tai_timestamp(tai);
        image.set_gimi_content_id(content_id);

        self.next_sample += 1;
        Ok(image)
    }

    // --- writing ---

    /// Whether the next sample needs a fresh chunk for this sample-entry type.
    pub(crate) fn needs_new_chunk(&self, entry_fourcc: FourCC) -> bool {
        match self.stsd_entries.last() {
            Some(last) => last.fourcc() != entry_fourcc,
            None => true,
        }
    }

    /// Starts a new chunk with the given sample description entry.
    pub(crate) fn add_chunk_with_entry(&mut self, mut entry: HeifBox) {
        if self.options.with_tai_timestamps != SampleAuxPresence::None {
            let clock_info = self.options.tai_clock_info.unwrap_or_default();
            entry.append_child(HeifBox::new(BoxData::Taic(TaicBox { clock_info })));
        }
        self.stsd_entries.push(entry);
        let chunk_index = self.stsc.entries.len() as u32 + 1;
        self.stsc
            .add_chunk(chunk_index, self.stsd_entries.len() as u32);
    }

    /// Appends one sample to the current chunk.
    pub(crate) fn write_sample_data(
        &mut self,
        file: &mut HeifFile,
        data: &[u8],
        duration: u32,
        is_sync_sample: bool,
        tai: Option<&TaiTimestamp>,
        gimi_content_id: Option<&str>,
    ) -> Result<()> {
        if duration == 0 {
            return Err(Error::usage("sample duration may not be 0"));
        }
        if self.stsd_entries.is_empty() {
            return Err(Error::usage("no sample description entry; add a chunk first"));
        }

        if self.stsc.last_chunk_empty() {
            // A new chunk begins: flush interleaved aux-info of the previous chunks first so
            // the chunk's samples stay contiguous.
            if let Some(helper) = &mut self.aux_helper_tai {
                helper.write_interleaved(file);
            }
            if let Some(helper) = &mut self.aux_helper_content_ids {
                helper.write_interleaved(file);
            }
            let data_start = file.append_sequence_data(data);
            self.stco.offsets.push(data_start);
        } else {
            file.append_sequence_data(data);
        }

        self.stsc.increase_samples_in_chunk(1);
        self.stsz.append_sample_size(data.len() as u32);
        if is_sync_sample {
            self.stss.sync_samples.push(self.next_sample + 1);
            self.has_stss = true;
        }
        self.stts.append_sample_duration(duration);

        if let Some(helper) = &mut self.aux_helper_tai {
            match tai {
                Some(tai) => helper.add_sample_info(&ItaiBox::encode_packet(tai))?,
                None if self.options.with_tai_timestamps == SampleAuxPresence::Optional => {
                    helper.add_nonpresent_sample()
                }
                None => {
                    return Err(Error::new(
                        ErrorKind::EncoderPlugin,
                        Suberror::Unspecified,
                        "mandatory TAI timestamp missing",
                    ));
                }
            }
        }

        if let Some(helper) = &mut self.aux_helper_content_ids {
            match gimi_content_id {
                Some(id) => {
                    let mut bytes = id.as_bytes().to_vec();
                    bytes.push(0);
                    helper.add_sample_info(&bytes)?;
                }
                None if self.options.with_gimi_content_ids == SampleAuxPresence::Optional => {
                    helper.add_nonpresent_sample()
                }
                None => {
                    return Err(Error::new(
                        ErrorKind::EncoderPlugin,
                        Suberror::Unspecified,
                        "mandatory GIMI content id missing",
                    ));
                }
            }
        }

        self.next_sample += 1;
        Ok(())
    }

    /// Flushes pending auxiliary data, sums up durations and prepares the sample tables for
    /// serialization.
    pub(crate) fn finalize(&mut self, file: &mut HeifFile) {
        if let Some(helper) = self.aux_helper_tai.take() {
            let (saiz, saio) = helper.finish(file);
            self.finished_aux_boxes.push(HeifBox::new(BoxData::Saiz(saiz)));
            self.finished_aux_boxes.push(HeifBox::new(BoxData::Saio(saio)));
        }
        if let Some(helper) = self.aux_helper_content_ids.take() {
            let (saiz, saio) = helper.finish(file);
            self.finished_aux_boxes.push(HeifBox::new(BoxData::Saiz(saiz)));
            self.finished_aux_boxes.push(HeifBox::new(BoxData::Saio(saio)));
        }

        if let Some(id) = &self.gimi_track_content_id {
            if self.gimi_id_location.is_none() {
                let mut bytes = id.as_bytes().to_vec();
                bytes.push(0);
                let pos = file.append_sequence_data(&bytes);
                self.gimi_id_location = Some((pos, bytes.len() as u64));
            }
        }

        self.mdhd.duration = self.stts.total_duration();
        self.finalized = true;
    }

    pub(crate) fn is_writer_created(&self) -> bool {
        self.writer_created
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Byte range of each chunk in the underlying file, in chunk order.
    pub(crate) fn chunk_byte_ranges(&self) -> Vec<(u64, u64)> {
        self.chunks
            .iter()
            .map(|chunk| {
                let size: u64 = (chunk.first_sample..=chunk.last_sample)
                    .map(|s| self.stsz.sample_size(s) as u64)
                    .sum();
                (chunk.offset, size)
            })
            .collect()
    }

    /// Concatenated sample-aux-info streams of a parsed track, for rewriting into a fresh
    /// trailing block per stream.
    pub(crate) fn materialize_aux_data(
        &self,
        file: &HeifFile,
    ) -> Result<Vec<((FourCC, u32), Vec<u8>)>> {
        let mut streams = Vec::new();
        for reader in [&self.aux_reader_tai, &self.aux_reader_content_ids]
            .into_iter()
            .flatten()
        {
            let Some(key) = reader.saiz.aux_info_type else {
                continue;
            };
            let mut bytes = Vec::new();
            for sample in 0..reader.saiz.sample_count {
                bytes.extend_from_slice(&reader.sample_info(file, sample)?);
            }
            streams.push((key, bytes));
        }
        Ok(streams)
    }

    /// Total duration converted into another timescale (for `mvhd`/`tkhd`).
    pub(crate) fn duration_in(&self, timescale: u32) -> u64 {
        if self.mdhd.timescale == 0 {
            return 0;
        }
        self.mdhd.duration * timescale as u64 / self.mdhd.timescale as u64
    }

    pub(crate) fn set_duration_in_movie_units(&mut self, duration: u64) {
        self.tkhd.duration = duration;
    }

    /// Builds the complete `trak` box for serialization.
    pub(crate) fn build_trak(&self) -> HeifBox {
        let mut trak = HeifBox::new(BoxData::Trak);
        trak.append_child(HeifBox::new(BoxData::Tkhd(self.tkhd.clone())));
        if !self.tref.references.is_empty() {
            trak.append_child(HeifBox::new(BoxData::Tref(self.tref.clone())));
        }

        let mdia = trak.append_child(HeifBox::new(BoxData::Mdia));
        mdia.append_child(HeifBox::new(BoxData::Mdhd(self.mdhd.clone())));
        mdia.append_child(HeifBox::new(BoxData::Hdlr(HdlrBox::new(self.handler))));

        let minf = mdia.append_child(HeifBox::new(BoxData::Minf));
        if self.is_visual() {
            minf.append_child(HeifBox::new(BoxData::Vmhd(Default::default())));
        } else {
            minf.append_child(HeifBox::new(BoxData::Nmhd));
        }
        let dinf = minf.append_child(HeifBox::new(BoxData::Dinf));
        let dref = dinf.append_child(HeifBox::new(BoxData::Dref));
        dref.append_child(HeifBox::new(BoxData::Url(
            heif_bmff::boxes::UrlBox {
                self_contained: true,
                location: None,
            },
        )));

        let stbl = minf.append_child(HeifBox::new(BoxData::Stbl));
        let stsd = stbl.append_child(HeifBox::new(BoxData::Stsd(StsdBox)));
        for entry in &self.stsd_entries {
            stsd.children.push(entry.clone());
        }
        stbl.append_child(HeifBox::new(BoxData::Stts(self.stts.clone())));
        stbl.append_child(HeifBox::new(BoxData::Stsc(self.stsc.clone())));
        stbl.append_child(HeifBox::new(BoxData::Stsz(self.stsz.clone())));
        stbl.append_child(HeifBox::new(BoxData::Stco(self.stco.clone())));
        if self.has_stss {
            stbl.append_child(HeifBox::new(BoxData::Stss(self.stss.clone())));
        }
        for aux in &self.finished_aux_boxes {
            stbl.children.push(aux.clone());
        }

        // Track-level GIMI content id lives in the track's own meta box.
        if let Some((offset, length)) = self.gimi_id_location {
            let mut meta = HeifBox::new(BoxData::Meta);
            meta.append_child(HeifBox::new(BoxData::Hdlr(HdlrBox::new(FourCC::META))));
            let mut infe = InfeBox::new(1, FourCC::URI);
            infe.item_uri_type = GIMI_TRACK_CONTENT_ID_URI.to_string();
            let iinf = meta.append_child(HeifBox::new(BoxData::Iinf));
            iinf.append_child(HeifBox::new(BoxData::Infe(infe)));
            let mut iloc = IlocBox::default();
            iloc.items.push(IlocItem {
                item_id: 1,
                construction_method: ConstructionMethod::File,
                data_reference_index: 0,
                base_offset: 0,
                extents: vec![IlocExtent {
                    index: 0,
                    offset,
                    length,
                }],
            });
            meta.append_child(HeifBox::new(BoxData::Iloc(iloc)));
            trak.append_child(meta);
        }

        trak
    }
}

fn required_table<T: Clone, F: Fn(&HeifBox) -> Option<&T>>(
    stbl: &HeifBox,
    fourcc: FourCC,
    f: F,
) -> Result<T> {
    stbl.child(fourcc)
        .and_then(|b| f(b))
        .cloned()
        .ok_or_else(|| Error::missing_box(fourcc))
}

/// Creates and configures a decoder for one sample description entry.
fn new_decoder_for_entry(
    entry: &HeifBox,
    registry: &PluginRegistry,
) -> Result<Box<dyn ImageDecoder>> {
    let format = CompressionFormat::from_sample_entry_type(entry.fourcc()).ok_or_else(|| {
        Error::unsupported(
            Suberror::UnsupportedCodec,
            format!("sample entry '{}' has no decoder mapping", entry.fourcc()),
        )
    })?;
    let mut decoder = registry.decoder_for(format)?;

    match format {
        CompressionFormat::Hevc => {
            if let Some(hvcc) = entry.child(FourCC::HVCC).and_then(|b| b.as_hvcc()) {
                let config = hvcc.header_nals();
                let config = if decoder.needs_start_codes() {
                    length_prefixed_to_annexb(&config, 4)?
                } else {
                    config
                };
                decoder.push_data(&config)?;
            }
        }
        CompressionFormat::Av1 => {
            if let Some(av1c) = entry.child(FourCC::AV1C).and_then(|b| b.as_av1c()) {
                decoder.push_data(&av1c.config_obus)?;
            }
        }
        _ => {}
    }

    Ok(decoder)
}

/// Reads the GIMI track content id from a `trak`-level meta box, if present.
fn read_track_content_id(trak: &HeifBox, file: &HeifFile) -> Option<String> {
    let meta = trak.child(FourCC::META)?;
    let iinf = meta.child(FourCC::IINF)?;
    let infe = iinf
        .children_of(FourCC::INFE)
        .filter_map(|c| c.as_infe())
        .find(|infe| {
            infe.item_type == Some(FourCC::URI) && infe.item_uri_type == GIMI_TRACK_CONTENT_ID_URI
        })?;
    let iloc = meta.child(FourCC::ILOC)?.as_iloc()?;
    let item = iloc.item(infe.item_id)?;

    let mut data = Vec::new();
    for extent in &item.extents {
        if item.construction_method != ConstructionMethod::File {
            return None;
        }
        file.read_file_range(item.base_offset + extent.offset, extent.length, &mut data)
            .ok()?;
    }
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    Some(String::from_utf8_lossy(&data[..end]).into_owned())
}

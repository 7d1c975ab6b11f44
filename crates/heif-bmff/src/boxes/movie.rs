//! Movie and track boxes: headers, sample tables, sample entries, track references and sample
//! auxiliary information.

use heif_bitstream::{BitstreamRange, StreamWriter};
use heif_image::{TaiClockInfo, TaiTimestamp};

use crate::error::{Error, Result, Suberror};
use crate::fourcc::FourCC;
use crate::header::BoxHeader;

/// Movie header box (`mvhd`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvhdBox {
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: u32,
    pub volume: u16,
    pub matrix: [u32; 9],
    pub next_track_id: u32,
}

pub const IDENTITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

impl Default for MvhdBox {
    fn default() -> Self {
        Self {
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            rate: 0x0001_0000,
            volume: 0x0100,
            matrix: IDENTITY_MATRIX,
            next_track_id: 1,
        }
    }
}

impl MvhdBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 1)?;
        let v1 = header.version() == 1;
        let mut mvhd = MvhdBox {
            creation_time: read_time(range, v1),
            modification_time: read_time(range, v1),
            timescale: range.read_u32(),
            duration: read_time(range, v1),
            ..Default::default()
        };
        mvhd.rate = range.read_u32();
        mvhd.volume = range.read_u16();
        range.skip(2 + 8); // reserved
        for m in &mut mvhd.matrix {
            *m = range.read_u32();
        }
        range.skip(6 * 4); // pre_defined
        mvhd.next_track_id = range.read_u32();
        Ok(mvhd)
    }

    pub fn derived_version(&self) -> u8 {
        if self.creation_time > u32::MAX as u64
            || self.modification_time > u32::MAX as u64
            || self.duration > u32::MAX as u64
        {
            1
        } else {
            0
        }
    }

    pub fn write(&self, w: &mut StreamWriter, version: u8) {
        let v1 = version == 1;
        write_time(w, self.creation_time, v1);
        write_time(w, self.modification_time, v1);
        w.write_u32(self.timescale);
        write_time(w, self.duration, v1);
        w.write_u32(self.rate);
        w.write_u16(self.volume);
        w.write_u16(0);
        w.write_u64(0);
        for m in &self.matrix {
            w.write_u32(*m);
        }
        for _ in 0..6 {
            w.write_u32(0);
        }
        w.write_u32(self.next_track_id);
    }
}

fn read_time(range: &mut BitstreamRange<'_>, v1: bool) -> u64 {
    if v1 {
        range.read_u64()
    } else {
        range.read_u32() as u64
    }
}

fn write_time(w: &mut StreamWriter, value: u64, v1: bool) {
    if v1 {
        w.write_u64(value);
    } else {
        w.write_u32(value as u32);
    }
}

/// Track header box (`tkhd`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TkhdBox {
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: u16,
    pub alternate_group: u16,
    pub volume: u16,
    pub matrix: [u32; 9],
    /// 16.16 fixed-point presentation width.
    pub width: u32,
    /// 16.16 fixed-point presentation height.
    pub height: u32,
}

impl Default for TkhdBox {
    fn default() -> Self {
        Self {
            creation_time: 0,
            modification_time: 0,
            track_id: 0,
            duration: 0,
            layer: 0,
            alternate_group: 0,
            volume: 0,
            matrix: IDENTITY_MATRIX,
            width: 0,
            height: 0,
        }
    }
}

impl TkhdBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 1)?;
        let v1 = header.version() == 1;
        let mut tkhd = TkhdBox {
            creation_time: read_time(range, v1),
            modification_time: read_time(range, v1),
            track_id: range.read_u32(),
            ..Default::default()
        };
        range.skip(4); // reserved
        tkhd.duration = read_time(range, v1);
        range.skip(8); // reserved
        tkhd.layer = range.read_u16();
        tkhd.alternate_group = range.read_u16();
        tkhd.volume = range.read_u16();
        range.skip(2); // reserved
        for m in &mut tkhd.matrix {
            *m = range.read_u32();
        }
        tkhd.width = range.read_u32();
        tkhd.height = range.read_u32();
        Ok(tkhd)
    }

    pub fn derived_version(&self) -> u8 {
        if self.creation_time > u32::MAX as u64
            || self.modification_time > u32::MAX as u64
            || self.duration > u32::MAX as u64
        {
            1
        } else {
            0
        }
    }

    pub fn write(&self, w: &mut StreamWriter, version: u8) {
        let v1 = version == 1;
        write_time(w, self.creation_time, v1);
        write_time(w, self.modification_time, v1);
        w.write_u32(self.track_id);
        w.write_u32(0);
        write_time(w, self.duration, v1);
        w.write_u64(0);
        w.write_u16(self.layer);
        w.write_u16(self.alternate_group);
        w.write_u16(self.volume);
        w.write_u16(0);
        for m in &self.matrix {
            w.write_u32(*m);
        }
        w.write_u32(self.width);
        w.write_u32(self.height);
    }

    pub fn set_resolution(&mut self, width: u16, height: u16) {
        self.width = (width as u32) << 16;
        self.height = (height as u32) << 16;
    }

    pub fn pixel_width(&self) -> u16 {
        (self.width >> 16) as u16
    }

    pub fn pixel_height(&self) -> u16 {
        (self.height >> 16) as u16
    }
}

/// Media header box (`mdhd`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdhdBox {
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// Packed ISO-639-2/T language code.
    pub language: u16,
}

impl Default for MdhdBox {
    fn default() -> Self {
        Self {
            creation_time: 0,
            modification_time: 0,
            timescale: 90000,
            duration: 0,
            language: 0x55c4, // "und"
        }
    }
}

impl MdhdBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 1)?;
        let v1 = header.version() == 1;
        let mdhd = MdhdBox {
            creation_time: read_time(range, v1),
            modification_time: read_time(range, v1),
            timescale: range.read_u32(),
            duration: read_time(range, v1),
            language: range.read_u16(),
        };
        range.skip(2); // pre_defined
        Ok(mdhd)
    }

    pub fn derived_version(&self) -> u8 {
        if self.creation_time > u32::MAX as u64
            || self.modification_time > u32::MAX as u64
            || self.duration > u32::MAX as u64
        {
            1
        } else {
            0
        }
    }

    pub fn write(&self, w: &mut StreamWriter, version: u8) {
        let v1 = version == 1;
        write_time(w, self.creation_time, v1);
        write_time(w, self.modification_time, v1);
        w.write_u32(self.timescale);
        write_time(w, self.duration, v1);
        w.write_u16(self.language);
        w.write_u16(0);
    }
}

/// Video media header box (`vmhd`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmhdBox {
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
}

impl VmhdBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        Ok(Self {
            graphics_mode: range.read_u16(),
            opcolor: [range.read_u16(), range.read_u16(), range.read_u16()],
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u16(self.graphics_mode);
        for c in &self.opcolor {
            w.write_u16(*c);
        }
    }
}

/// Sample description box (`stsd`); the entries are the child boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StsdBox;

impl StsdBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<u32> {
        header.read_full_checked(range, 0)?;
        Ok(range.read_u32())
    }
}

/// The fixed part of a VisualSampleEntry; codec configuration comes as child boxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualSampleEntryBox {
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub compressor_name: String,
    pub depth: u16,
}

impl Default for VisualSampleEntryBox {
    fn default() -> Self {
        Self {
            data_reference_index: 1,
            width: 0,
            height: 0,
            compressor_name: String::new(),
            depth: 0x0018,
        }
    }
}

impl VisualSampleEntryBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        range.skip(6); // reserved
        let data_reference_index = range.read_u16();
        range.skip(2 + 2 + 12); // pre_defined, reserved, pre_defined
        let width = range.read_u16();
        let height = range.read_u16();
        range.skip(4 + 4 + 4 + 2); // resolutions, reserved, frame_count
        let name_bytes = range.read_fixed::<32>();
        let name_len = (name_bytes[0] as usize).min(31);
        let compressor_name = String::from_utf8_lossy(&name_bytes[1..1 + name_len]).into_owned();
        let depth = range.read_u16();
        range.skip(2); // pre_defined = -1
        Ok(Self {
            data_reference_index,
            width,
            height,
            compressor_name,
            depth,
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_bytes(&[0; 6]);
        w.write_u16(self.data_reference_index);
        w.write_bytes(&[0; 16]);
        w.write_u16(self.width);
        w.write_u16(self.height);
        w.write_u32(0x0048_0000); // 72 dpi
        w.write_u32(0x0048_0000);
        w.write_u32(0);
        w.write_u16(1); // frame_count
        let mut name = [0u8; 32];
        let bytes = self.compressor_name.as_bytes();
        let len = bytes.len().min(31);
        name[0] = len as u8;
        name[1..1 + len].copy_from_slice(&bytes[..len]);
        w.write_bytes(&name);
        w.write_u16(self.depth);
        w.write_u16(0xffff); // pre_defined = -1
    }
}

/// The fixed part of a URIMetaSampleEntry (`urim`); the `uri ` box is a child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrimBox {
    pub data_reference_index: u16,
}

impl Default for UrimBox {
    fn default() -> Self {
        Self {
            data_reference_index: 1,
        }
    }
}

impl UrimBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        range.skip(6);
        Ok(Self {
            data_reference_index: range.read_u16(),
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_bytes(&[0; 6]);
        w.write_u16(self.data_reference_index);
    }
}

/// URI box (`uri `), the label of a `urim` sample entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UriBox {
    pub uri: String,
}

impl UriBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        Ok(Self {
            uri: range.read_nul_string(),
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_nul_string(&self.uri);
    }
}

/// Decoding time to sample box (`stts`), run-length encoded sample durations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SttsBox {
    pub entries: Vec<(u32, u32)>,
}

impl SttsBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let count = range.read_u32();
        let mut entries = Vec::new();
        for _ in 0..count {
            if range.eof() || range.error() {
                break;
            }
            entries.push((range.read_u32(), range.read_u32()));
        }
        Ok(Self { entries })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u32(self.entries.len() as u32);
        for (count, delta) in &self.entries {
            w.write_u32(*count);
            w.write_u32(*delta);
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|(count, _)| *count as u64).sum()
    }

    pub fn total_duration(&self) -> u64 {
        self.entries
            .iter()
            .map(|(count, delta)| *count as u64 * *delta as u64)
            .sum()
    }

    /// Duration of the 0-based sample index, or 0 when out of range.
    pub fn sample_duration(&self, mut index: u32) -> u32 {
        for (count, delta) in &self.entries {
            if index < *count {
                return *delta;
            }
            index -= *count;
        }
        0
    }

    /// Appends one sample duration, extending the last run when it matches.
    pub fn append_sample_duration(&mut self, duration: u32) {
        if let Some((count, delta)) = self.entries.last_mut() {
            if *delta == duration {
                *count += 1;
                return;
            }
        }
        self.entries.push((1, duration));
    }
}

/// Sample to chunk box (`stsc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StscEntry {
    /// 1-based index of the first chunk this run applies to.
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    /// 1-based index into the `stsd` entries.
    pub sample_description_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StscBox {
    pub entries: Vec<StscEntry>,
}

impl StscBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let count = range.read_u32();
        let mut entries = Vec::new();
        for _ in 0..count {
            if range.eof() || range.error() {
                break;
            }
            entries.push(StscEntry {
                first_chunk: range.read_u32(),
                samples_per_chunk: range.read_u32(),
                sample_description_index: range.read_u32(),
            });
        }
        Ok(Self { entries })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u32(self.entries.len() as u32);
        for entry in &self.entries {
            w.write_u32(entry.first_chunk);
            w.write_u32(entry.samples_per_chunk);
            w.write_u32(entry.sample_description_index);
        }
    }

    /// Resolves the run covering the 1-based chunk index.
    pub fn entry_for_chunk(&self, chunk_index: u32) -> Option<StscEntry> {
        let mut found = None;
        for entry in &self.entries {
            if entry.first_chunk > chunk_index {
                break;
            }
            found = Some(*entry);
        }
        found
    }

    /// Starts a new chunk using the given sample description.
    pub fn add_chunk(&mut self, chunk_index: u32, sample_description_index: u32) {
        self.entries.push(StscEntry {
            first_chunk: chunk_index,
            samples_per_chunk: 0,
            sample_description_index,
        });
    }

    pub fn last_chunk_empty(&self) -> bool {
        self.entries
            .last()
            .map(|e| e.samples_per_chunk == 0)
            .unwrap_or(true)
    }

    pub fn increase_samples_in_chunk(&mut self, n: u32) {
        if let Some(entry) = self.entries.last_mut() {
            entry.samples_per_chunk += n;
        }
    }
}

/// Chunk offset box (`stco` or `co64`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StcoBox {
    pub offsets: Vec<u64>,
    /// Whether this table uses (or must be written with) 64-bit offsets.
    pub co64: bool,
}

impl StcoBox {
    pub fn parse(
        range: &mut BitstreamRange<'_>,
        header: &mut BoxHeader,
        co64: bool,
    ) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let count = range.read_u32();
        let mut offsets = Vec::new();
        for _ in 0..count {
            if range.eof() || range.error() {
                break;
            }
            offsets.push(if co64 {
                range.read_u64()
            } else {
                range.read_u32() as u64
            });
        }
        Ok(Self { offsets, co64 })
    }

    /// Serializes the offset table; also used for back-patching after `mdat` layout.
    pub fn write_table(&self, w: &mut StreamWriter) {
        w.write_u32(self.offsets.len() as u32);
        for &offset in &self.offsets {
            if self.co64 {
                w.write_u64(offset);
            } else {
                w.write_u32(offset as u32);
            }
        }
    }
}

/// Sync sample box (`stss`), 1-based sample numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StssBox {
    pub sync_samples: Vec<u32>,
}

impl StssBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let count = range.read_u32();
        let mut sync_samples = Vec::new();
        for _ in 0..count {
            if range.eof() || range.error() {
                break;
            }
            sync_samples.push(range.read_u32());
        }
        Ok(Self { sync_samples })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u32(self.sync_samples.len() as u32);
        for &sample in &self.sync_samples {
            w.write_u32(sample);
        }
    }

    pub fn is_sync_sample(&self, sample_number: u32) -> bool {
        self.sync_samples.contains(&sample_number)
    }
}

/// Sample size box (`stsz`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StszBox {
    pub default_size: u32,
    pub sample_count: u32,
    pub sizes: Vec<u32>,
}

impl StszBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let default_size = range.read_u32();
        let sample_count = range.read_u32();
        let mut sizes = Vec::new();
        if default_size == 0 {
            for _ in 0..sample_count {
                if range.eof() || range.error() {
                    break;
                }
                sizes.push(range.read_u32());
            }
        }
        Ok(Self {
            default_size,
            sample_count,
            sizes,
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u32(self.default_size);
        w.write_u32(self.sample_count);
        if self.default_size == 0 {
            for &size in &self.sizes {
                w.write_u32(size);
            }
        }
    }

    /// Size of the 0-based sample index.
    pub fn sample_size(&self, index: u32) -> u32 {
        if self.default_size != 0 {
            self.default_size
        } else {
            self.sizes.get(index as usize).copied().unwrap_or(0)
        }
    }

    pub fn append_sample_size(&mut self, size: u32) {
        self.sizes.push(size);
        self.sample_count += 1;
    }
}

/// Sample auxiliary information sizes box (`saiz`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaizBox {
    pub aux_info_type: Option<(FourCC, u32)>,
    pub default_sample_info_size: u8,
    pub sample_count: u32,
    pub sizes: Vec<u8>,
}

impl SaizBox {
    pub fn with_type(aux_info_type: FourCC, parameter: u32) -> Self {
        Self {
            aux_info_type: Some((aux_info_type, parameter)),
            ..Default::default()
        }
    }

    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let aux_info_type = if header.flags() & 1 != 0 {
            Some((FourCC(range.read_fixed::<4>()), range.read_u32()))
        } else {
            None
        };
        let default_sample_info_size = range.read_u8();
        let sample_count = range.read_u32();
        let mut sizes = Vec::new();
        if default_sample_info_size == 0 {
            for _ in 0..sample_count {
                if range.eof() || range.error() {
                    break;
                }
                sizes.push(range.read_u8());
            }
        }
        Ok(Self {
            aux_info_type,
            default_sample_info_size,
            sample_count,
            sizes,
        })
    }

    pub fn derived_flags(&self) -> u32 {
        u32::from(self.aux_info_type.is_some())
    }

    pub fn write(&self, w: &mut StreamWriter) {
        if let Some((fourcc, parameter)) = self.aux_info_type {
            w.write_bytes(&fourcc.0);
            w.write_u32(parameter);
        }
        w.write_u8(self.default_sample_info_size);
        w.write_u32(self.sample_count);
        if self.default_sample_info_size == 0 {
            w.write_bytes(&self.sizes);
        }
    }

    /// Size of the 0-based sample's aux info.
    pub fn sample_info_size(&self, index: u32) -> u8 {
        if self.default_sample_info_size != 0 {
            self.default_sample_info_size
        } else {
            self.sizes.get(index as usize).copied().unwrap_or(0)
        }
    }

    pub fn add_sample_size(&mut self, size: u8) {
        self.sizes.push(size);
        self.sample_count += 1;
    }

    pub fn add_nonpresent_sample(&mut self) {
        self.sizes.push(0);
        self.sample_count += 1;
    }
}

/// Sample auxiliary information offsets box (`saio`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaioBox {
    pub aux_info_type: Option<(FourCC, u32)>,
    pub offsets: Vec<u64>,
    /// Force 64-bit offsets on write (version 1).
    pub wide_offsets: bool,
}

impl SaioBox {
    pub fn with_type(aux_info_type: FourCC, parameter: u32) -> Self {
        Self {
            aux_info_type: Some((aux_info_type, parameter)),
            ..Default::default()
        }
    }

    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 1)?;
        let aux_info_type = if header.flags() & 1 != 0 {
            Some((FourCC(range.read_fixed::<4>()), range.read_u32()))
        } else {
            None
        };
        let wide = header.version() == 1;
        let count = range.read_u32();
        let mut offsets = Vec::new();
        for _ in 0..count {
            if range.eof() || range.error() {
                break;
            }
            offsets.push(if wide {
                range.read_u64()
            } else {
                range.read_u32() as u64
            });
        }
        Ok(Self {
            aux_info_type,
            offsets,
            wide_offsets: wide,
        })
    }

    pub fn derived_version_flags(&self) -> (u8, u32) {
        (
            u8::from(self.wide_offsets),
            u32::from(self.aux_info_type.is_some()),
        )
    }

    /// Serializes the offset table; also used for back-patching after `mdat` layout.
    pub fn write_table(&self, w: &mut StreamWriter) {
        if let Some((fourcc, parameter)) = self.aux_info_type {
            w.write_bytes(&fourcc.0);
            w.write_u32(parameter);
        }
        w.write_u32(self.offsets.len() as u32);
        for &offset in &self.offsets {
            if self.wide_offsets {
                w.write_u64(offset);
            } else {
                w.write_u32(offset as u32);
            }
        }
    }
}

/// One typed track reference edge set of a `tref` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackReference {
    pub ref_type: FourCC,
    pub track_ids: Vec<u32>,
}

/// Track reference box (`tref`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrefBox {
    pub references: Vec<TrackReference>,
}

impl TrefBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let mut references = Vec::new();
        while !range.eof() && !range.error() {
            let child = BoxHeader::parse(range);
            let Some(content) = child.content_size() else {
                return Err(Error::invalid_input(
                    Suberror::InvalidBoxSize,
                    "track reference size smaller than its header",
                ));
            };
            let mut sub = range.sub_range(content);
            let mut track_ids = Vec::new();
            while !sub.eof() && !sub.error() {
                track_ids.push(sub.read_u32());
            }
            if sub.error() {
                return Err(Error::truncated("truncated track reference box"));
            }
            references.push(TrackReference {
                ref_type: child.box_type,
                track_ids,
            });
        }
        Ok(Self { references })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        for reference in &self.references {
            w.write_u32(8 + reference.track_ids.len() as u32 * 4);
            w.write_bytes(&reference.ref_type.0);
            for &id in &reference.track_ids {
                w.write_u32(id);
            }
        }
    }

    pub fn references_of_type(&self, ref_type: FourCC) -> &[u32] {
        self.references
            .iter()
            .find(|r| r.ref_type == ref_type)
            .map(|r| r.track_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn add_references(&mut self, ref_type: FourCC, to_track_id: u32) {
        if let Some(existing) = self.references.iter_mut().find(|r| r.ref_type == ref_type) {
            existing.track_ids.push(to_track_id);
            return;
        }
        self.references.push(TrackReference {
            ref_type,
            track_ids: vec![to_track_id],
        });
    }
}

/// TAI clock information box (`taic`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaicBox {
    pub clock_info: TaiClockInfo,
}

impl TaicBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        Ok(Self {
            clock_info: TaiClockInfo {
                time_uncertainty: range.read_u64(),
                clock_resolution: range.read_u32(),
                clock_drift_rate: range.read_i32(),
                clock_type: range.read_u8() >> 6,
            },
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u64(self.clock_info.time_uncertainty);
        w.write_u32(self.clock_info.clock_resolution);
        w.write_i32(self.clock_info.clock_drift_rate);
        w.write_u8((self.clock_info.clock_type & 0x03) << 6);
    }
}

/// TAI timestamp box (`itai`). The same 9-byte packet layout is used for `stai` sample
/// auxiliary information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItaiBox {
    pub timestamp: TaiTimestamp,
}

impl ItaiBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let tai_timestamp = range.read_u64();
        let status = range.read_u8();
        Ok(Self {
            timestamp: TaiTimestamp {
                tai_timestamp,
                synchronization_state: status & 0x80 != 0,
                timestamp_generation_failure: status & 0x40 != 0,
                timestamp_is_modified: status & 0x20 != 0,
            },
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_bytes(&Self::encode_packet(&self.timestamp));
    }

    /// Encodes the 9-byte timestamp packet used in `stai` sample aux info.
    pub fn encode_packet(timestamp: &TaiTimestamp) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[..8].copy_from_slice(&timestamp.tai_timestamp.to_be_bytes());
        let mut status = 0u8;
        if timestamp.synchronization_state {
            status |= 0x80;
        }
        if timestamp.timestamp_generation_failure {
            status |= 0x40;
        }
        if timestamp.timestamp_is_modified {
            status |= 0x20;
        }
        out[8] = status;
        out
    }

    /// Decodes the 9-byte timestamp packet.
    pub fn decode_packet(data: &[u8]) -> Result<TaiTimestamp> {
        if data.len() < 9 {
            return Err(Error::truncated("TAI timestamp packet too short"));
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&data[..8]);
        let status = data[8];
        Ok(TaiTimestamp {
            tai_timestamp: u64::from_be_bytes(ts),
            synchronization_state: status & 0x80 != 0,
            timestamp_generation_failure: status & 0x40 != 0,
            timestamp_is_modified: status & 0x20 != 0,
        })
    }
}

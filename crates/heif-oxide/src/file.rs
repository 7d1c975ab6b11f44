//! Top-level file structure: reading the box sequence, dereferencing item extents, and laying
//! the whole structure back out with back-patched offsets.

use std::collections::BTreeMap;
use std::sync::Arc;

use heif_bitstream::{BitstreamRange, ByteSource, SourceCursor, StreamWriter};
use heif_bmff::boxes::{
    read_box, BoxData, ConstructionMethod, FtypBox, HdlrBox, HeifBox, IlocBox, IlocExtent,
    IlocItem, InfeBox, PatchPositions, PitmBox, PropertyAssociation,
};
use heif_bmff::{Error, FourCC, Result, SecurityLimits, Suberror};

use crate::brands;

/// Depth cap for `item` construction-method chains.
const MAX_ITEM_DEREF_DEPTH: u32 = 8;

/// A parsed or under-construction HEIF file: the ordered top-level boxes plus, on the write
/// side, the pending payload bytes that will become `mdat`.
pub struct HeifFile {
    source: Arc<dyn ByteSource>,
    pub top_level: Vec<HeifBox>,
    limits: SecurityLimits,

    next_item_id: u32,
    item_payloads: BTreeMap<u32, Vec<u8>>,
    sequence_data: Vec<u8>,
}

impl std::fmt::Debug for HeifFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeifFile")
            .field("top_level", &self.top_level.len())
            .field("next_item_id", &self.next_item_id)
            .field("pending_items", &self.item_payloads.len())
            .field("sequence_bytes", &self.sequence_data.len())
            .finish()
    }
}

impl HeifFile {
    /// Parses a complete file from a byte source.
    pub fn parse(source: Arc<dyn ByteSource>, limits: SecurityLimits) -> Result<Self> {
        let mut top_level = Vec::new();
        {
            let mut cursor = SourceCursor::new(source.as_ref());
            let len = source.len();
            let mut range = BitstreamRange::new(&mut cursor, len);
            while !range.eof() && !range.error() {
                top_level.push(read_box(&mut range, &limits, 0)?);
            }
        }

        let Some(first) = top_level.first() else {
            return Err(Error::truncated("file contains no boxes"));
        };
        let Some(ftyp) = first.as_ftyp() else {
            return Err(Error::missing_box(FourCC::FTYP));
        };
        if !brands::supported_for_reading(ftyp) {
            return Err(Error::invalid_input(
                Suberror::NoCompatibleBrand,
                format!("no compatible brand (major brand is '{}')", ftyp.major_brand),
            ));
        }
        tracing::debug!(major_brand = %ftyp.major_brand, "Parsed file");

        let next_item_id = top_level
            .iter()
            .find(|b| b.fourcc() == FourCC::META)
            .and_then(|meta| meta.child(FourCC::IINF))
            .map(|iinf| {
                iinf.children_of(FourCC::INFE)
                    .filter_map(|c| c.as_infe())
                    .map(|infe| infe.item_id)
                    .max()
                    .unwrap_or(0)
                    + 1
            })
            .unwrap_or(1);

        Ok(Self {
            source,
            top_level,
            limits,
            next_item_id,
            item_payloads: BTreeMap::new(),
            sequence_data: Vec::new(),
        })
    }

    /// Creates an empty file for writing: `ftyp` placeholder plus the `meta` skeleton.
    pub fn new_writer(limits: SecurityLimits) -> Self {
        let ftyp = HeifBox::new(BoxData::Ftyp(FtypBox {
            major_brand: FourCC::MIF1,
            minor_version: 0,
            compatible_brands: Vec::new(),
        }));

        let mut meta = HeifBox::new(BoxData::Meta);
        meta.append_child(HeifBox::new(BoxData::Hdlr(HdlrBox::new(FourCC::PICT))));
        meta.append_child(HeifBox::new(BoxData::Pitm(PitmBox { item_id: 0 })));
        meta.append_child(HeifBox::new(BoxData::Iinf));
        meta.append_child(HeifBox::new(BoxData::Iloc(IlocBox::default())));
        let mut iprp = HeifBox::new(BoxData::Iprp);
        iprp.append_child(HeifBox::new(BoxData::Ipco));
        iprp.append_child(HeifBox::new(BoxData::Ipma(Default::default())));
        meta.append_child(iprp);

        Self {
            source: Arc::new(heif_bitstream::MemorySource::new(Vec::new())),
            top_level: vec![ftyp, meta],
            limits,
            next_item_id: 1,
            item_payloads: BTreeMap::new(),
            sequence_data: Vec::new(),
        }
    }

    pub fn limits(&self) -> &SecurityLimits {
        &self.limits
    }

    pub fn source(&self) -> &dyn ByteSource {
        self.source.as_ref()
    }

    // --- accessors over the parsed tree ---

    pub fn top_level_box(&self, fourcc: FourCC) -> Option<&HeifBox> {
        self.top_level.iter().find(|b| b.fourcc() == fourcc)
    }

    fn top_level_box_mut(&mut self, fourcc: FourCC) -> Option<&mut HeifBox> {
        self.top_level.iter_mut().find(|b| b.fourcc() == fourcc)
    }

    pub fn ftyp(&self) -> Result<&FtypBox> {
        self.top_level_box(FourCC::FTYP)
            .and_then(|b| b.as_ftyp())
            .ok_or_else(|| Error::missing_box(FourCC::FTYP))
    }

    pub fn ftyp_mut(&mut self) -> &mut FtypBox {
        self.top_level_box_mut(FourCC::FTYP)
            .and_then(|b| b.as_ftyp_mut())
            .expect("writer files always carry an ftyp")
    }

    pub fn meta(&self) -> Result<&HeifBox> {
        self.top_level_box(FourCC::META)
            .ok_or_else(|| Error::missing_box(FourCC::META))
    }

    pub fn meta_mut(&mut self) -> &mut HeifBox {
        self.top_level_box_mut(FourCC::META)
            .expect("writer files always carry a meta box")
    }

    pub fn moov(&self) -> Option<&HeifBox> {
        self.top_level_box(FourCC::MOOV)
    }

    /// Adds an empty `moov` skeleton when none exists yet, returning it.
    pub fn ensure_moov(&mut self) -> &mut HeifBox {
        if self.top_level_box(FourCC::MOOV).is_none() {
            let mut moov = HeifBox::new(BoxData::Moov);
            moov.append_child(HeifBox::new(BoxData::Mvhd(Default::default())));
            self.top_level.push(moov);
        }
        self.top_level_box_mut(FourCC::MOOV).unwrap()
    }

    pub fn meta_child(&self, fourcc: FourCC) -> Result<&HeifBox> {
        self.meta()?
            .child(fourcc)
            .ok_or_else(|| Error::missing_box(fourcc))
    }

    pub fn primary_item_id(&self) -> Result<u32> {
        let pitm = self
            .meta_child(FourCC::PITM)?
            .as_pitm()
            .ok_or_else(|| Error::missing_box(FourCC::PITM))?;
        Ok(pitm.item_id)
    }

    pub fn infe_items(&self) -> Result<Vec<&InfeBox>> {
        Ok(self
            .meta_child(FourCC::IINF)?
            .children_of(FourCC::INFE)
            .filter_map(|c| c.as_infe())
            .collect())
    }

    pub fn iloc(&self) -> Result<&IlocBox> {
        self.meta_child(FourCC::ILOC)?
            .as_iloc()
            .ok_or_else(|| Error::missing_box(FourCC::ILOC))
    }

    /// The ordered property boxes of `ipco`.
    pub fn ipco_properties(&self) -> Result<&[HeifBox]> {
        let iprp = self.meta_child(FourCC::IPRP)?;
        let ipco = iprp
            .child(FourCC::IPCO)
            .ok_or_else(|| Error::missing_box(FourCC::IPCO))?;
        Ok(&ipco.children)
    }

    /// Resolves the ordered, validated property list of one item.
    pub fn properties_for_item(&self, item_id: u32) -> Result<Vec<(bool, &HeifBox)>> {
        let iprp = self.meta_child(FourCC::IPRP)?;
        let ipco = iprp
            .child(FourCC::IPCO)
            .ok_or_else(|| Error::missing_box(FourCC::IPCO))?;
        let ipma = iprp
            .child(FourCC::IPMA)
            .and_then(|b| b.as_ipma())
            .ok_or_else(|| Error::missing_box(FourCC::IPMA))?;

        let Some(associations) = ipma.associations_for(item_id) else {
            return Ok(Vec::new());
        };

        let mut properties = Vec::with_capacity(associations.len());
        for assoc in associations {
            if assoc.property_index == 0 {
                continue;
            }
            let index = assoc.property_index as usize - 1;
            let Some(property) = ipco.children.get(index) else {
                return Err(Error::invalid_input(
                    Suberror::NonexistentPropertyReferenced,
                    format!(
                        "item {item_id} references ipco property {} of {}",
                        assoc.property_index,
                        ipco.children.len()
                    ),
                ));
            };
            properties.push((assoc.essential, property));
        }
        Ok(properties)
    }

    // --- item data dereference ---

    /// Concatenates all extents of an item, following the construction method.
    pub fn read_item_data(&self, item_id: u32) -> Result<Vec<u8>> {
        self.read_item_data_inner(item_id, 0)
    }

    fn read_item_data_inner(&self, item_id: u32, depth: u32) -> Result<Vec<u8>> {
        if depth > MAX_ITEM_DEREF_DEPTH {
            return Err(Error::invalid_input(
                Suberror::ReferenceCycle,
                "item construction chain is too deep",
            ));
        }

        // Writer-side items have their payload pending in memory.
        if let Some(pending) = self.item_payloads.get(&item_id) {
            return Ok(pending.clone());
        }

        let iloc = self.iloc()?;
        let item = iloc.item(item_id).ok_or_else(|| {
            Error::invalid_input(
                Suberror::NoItemData,
                format!("item {item_id} has no iloc entry"),
            )
        })?;

        let mut out: Vec<u8> = Vec::new();
        for extent in &item.extents {
            let total = out.len() as u64 + extent.length;
            if total > self.limits.max_memory_block_size {
                return Err(Error::limit(format!(
                    "item {item_id} dereferences to {total} bytes, exceeding the memory limit"
                )));
            }

            match item.construction_method {
                ConstructionMethod::File => {
                    let start = item.base_offset + extent.offset;
                    self.read_file_range(start, extent.length, &mut out)?;
                }
                ConstructionMethod::Idat => {
                    let idat = self
                        .meta_child(FourCC::IDAT)
                        .map_err(|_| {
                            Error::invalid_input(
                                Suberror::MissingBox(FourCC::IDAT),
                                "iloc references idat but the file has none",
                            )
                        })?
                        .as_idat()
                        .copied()
                        .ok_or_else(|| Error::missing_box(FourCC::IDAT))?;
                    let offset = item.base_offset + extent.offset;
                    if offset + extent.length > idat.data_len {
                        return Err(Error::truncated("extent outside of idat payload"));
                    }
                    self.read_file_range(idat.data_start + offset, extent.length, &mut out)?;
                }
                ConstructionMethod::Item => {
                    // The extent index selects the 'iloc' item reference to read through.
                    let iref = self
                        .meta_child(FourCC::IREF)?
                        .as_iref()
                        .ok_or_else(|| Error::missing_box(FourCC::IREF))?;
                    let sources = iref.references_from(item_id, FourCC::ILOC);
                    let index = if extent.index > 0 {
                        extent.index as usize - 1
                    } else {
                        0
                    };
                    let Some(&source_item) = sources.get(index) else {
                        return Err(Error::invalid_input(
                            Suberror::NonexistentItemReferenced,
                            "item extent references a missing source item",
                        ));
                    };
                    let source_data = self.read_item_data_inner(source_item, depth + 1)?;
                    let start = (item.base_offset + extent.offset) as usize;
                    let len = if extent.length == 0 {
                        source_data.len().saturating_sub(start)
                    } else {
                        extent.length as usize
                    };
                    if start + len > source_data.len() {
                        return Err(Error::truncated("extent outside of source item data"));
                    }
                    out.extend_from_slice(&source_data[start..start + len]);
                }
            }
        }

        Ok(out)
    }

    /// Reads an absolute file range, appending to `out`.
    pub fn read_file_range(&self, start: u64, length: u64, out: &mut Vec<u8>) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        if length > self.limits.max_memory_block_size {
            return Err(Error::limit("file range exceeds the memory limit"));
        }
        if start + length > self.source.len() {
            return Err(Error::invalid_input(
                Suberror::EndOfData,
                format!(
                    "extent points outside of the file ({}..{} of {})",
                    start,
                    start + length,
                    self.source.len()
                ),
            ));
        }
        let old_len = out.len();
        out.resize(old_len + length as usize, 0);
        let got = self.source.read_at(start, &mut out[old_len..]);
        if got != length as usize {
            out.truncate(old_len);
            return Err(Error::truncated("file range read came up short"));
        }
        Ok(())
    }

    // --- writer-side item construction ---

    /// Allocates a fresh item id and adds its `infe` entry.
    pub fn add_item(&mut self, item_type: FourCC) -> u32 {
        let id = self.next_item_id;
        self.next_item_id += 1;
        let infe = InfeBox::new(id, item_type);
        self.meta_mut()
            .child_mut(FourCC::IINF)
            .expect("writer meta always has iinf")
            .append_child(HeifBox::new(BoxData::Infe(infe)));
        id
    }

    pub fn infe_mut(&mut self, item_id: u32) -> Option<&mut InfeBox> {
        self.meta_mut()
            .child_mut(FourCC::IINF)?
            .children
            .iter_mut()
            .filter_map(|c| c.as_infe_mut())
            .find(|infe| infe.item_id == item_id)
    }

    pub fn has_pending_item_data(&self, item_id: u32) -> bool {
        self.item_payloads.contains_key(&item_id)
    }

    /// Stores the payload of an item; it will be written into `mdat` in item-id order.
    pub fn set_item_data(&mut self, item_id: u32, data: Vec<u8>) {
        let length = data.len() as u64;
        self.item_payloads.insert(item_id, data);
        let iloc = self
            .meta_mut()
            .child_mut(FourCC::ILOC)
            .and_then(|b| b.as_iloc_mut())
            .expect("writer meta always has iloc");
        if let Some(item) = iloc.item_mut(item_id) {
            item.extents = vec![IlocExtent {
                index: 0,
                offset: 0,
                length,
            }];
            return;
        }
        iloc.items.push(IlocItem {
            item_id,
            construction_method: ConstructionMethod::File,
            data_reference_index: 0,
            base_offset: 0,
            extents: vec![IlocExtent {
                index: 0,
                offset: 0,
                length,
            }],
        });
    }

    /// Associates a property with an item, reusing an identical `ipco` entry when present.
    pub fn add_property(&mut self, item_id: u32, property: HeifBox, essential: bool) {
        let iprp = self
            .meta_mut()
            .child_mut(FourCC::IPRP)
            .expect("writer meta always has iprp");
        let ipco = iprp
            .child_mut(FourCC::IPCO)
            .expect("writer meta always has ipco");
        let index = match ipco.children.iter().position(|c| *c == property) {
            Some(found) => found + 1,
            None => {
                ipco.children.push(property);
                ipco.children.len()
            }
        };
        let ipma = iprp
            .child_mut(FourCC::IPMA)
            .and_then(|b| b.as_ipma_mut())
            .expect("writer meta always has ipma");
        ipma.add_association(
            item_id,
            PropertyAssociation {
                essential,
                property_index: index as u16,
            },
        );
    }

    pub fn set_primary_item(&mut self, item_id: u32) {
        if let Some(pitm) = self
            .meta_mut()
            .child_mut(FourCC::PITM)
            .and_then(|b| b.as_pitm_mut())
        {
            pitm.item_id = item_id;
        }
    }

    pub fn add_item_reference(&mut self, from_item: u32, ref_type: FourCC, to_items: &[u32]) {
        let meta = self.meta_mut();
        if meta.child(FourCC::IREF).is_none() {
            meta.append_child(HeifBox::new(BoxData::Iref(Default::default())));
        }
        meta.child_mut(FourCC::IREF)
            .and_then(|b| b.as_iref_mut())
            .expect("iref was just ensured")
            .add_reference(from_item, ref_type, to_items);
    }

    /// Appends bytes to the pending sequence data, returning their offset relative to the
    /// start of the sequence block inside the future `mdat`.
    pub fn append_sequence_data(&mut self, data: &[u8]) -> u64 {
        let pos = self.sequence_data.len() as u64;
        self.sequence_data.extend_from_slice(data);
        pos
    }

    // --- serialization ---

    /// Serializes the whole file, laying out `mdat` and back-patching `iloc`, `stco`/`co64`
    /// and `saio`.
    pub fn write(&mut self) -> Result<Vec<u8>> {
        let payload_total: u64 = self
            .item_payloads
            .values()
            .map(|d| d.len() as u64)
            .sum::<u64>()
            + self.sequence_data.len() as u64;
        // Crossing the 32-bit boundary promotes the mdat header, chunk offsets and extent
        // fields in one go; the margin covers the boxes written before mdat.
        let wide = payload_total > u32::MAX as u64 - (1 << 20);

        self.prepare_offset_widths(wide);

        for top in &mut self.top_level {
            top.derive_versions();
        }

        let (major, compatibles) = brands::compute_write_brands(self);
        {
            let ftyp = self.ftyp_mut();
            ftyp.major_brand = major;
            ftyp.compatible_brands = compatibles;
        }

        let mut w = StreamWriter::new();
        let mut patches = PatchPositions::default();
        for top in &self.top_level {
            if skip_on_write(top) {
                continue;
            }
            top.write(&mut w, &mut patches)?;
        }

        // --- mdat ---
        let mdat_payload_start = if wide {
            w.write_u32(1);
            w.write_bytes(&FourCC::MDAT.0);
            w.write_u64(payload_total + 16);
            w.data_size() as u64
        } else {
            w.write_u32(payload_total as u32 + 8);
            w.write_bytes(&FourCC::MDAT.0);
            w.data_size() as u64
        };

        let mut item_offsets: BTreeMap<u32, u64> = BTreeMap::new();
        for (&item_id, data) in &self.item_payloads {
            item_offsets.insert(item_id, w.data_size() as u64);
            w.write_bytes(data);
        }
        let sequence_base = w.data_size() as u64;
        w.write_bytes(&self.sequence_data);
        debug_assert_eq!(
            w.data_size() as u64,
            mdat_payload_start + payload_total
        );

        // --- update offsets in the tree ---
        if let Some(iloc) = self
            .top_level_box_mut(FourCC::META)
            .and_then(|m| m.child_mut(FourCC::ILOC))
            .and_then(|b| b.as_iloc_mut())
        {
            for item in &mut iloc.items {
                if let Some(&abs) = item_offsets.get(&item.item_id) {
                    item.base_offset = 0;
                    for extent in &mut item.extents {
                        extent.offset = abs;
                    }
                }
            }
        }
        if let Some(moov) = self.top_level_box_mut(FourCC::MOOV) {
            visit_mut(moov, &mut |node| match &mut node.data {
                BoxData::Stco(stco) => {
                    for offset in &mut stco.offsets {
                        *offset += sequence_base;
                    }
                }
                BoxData::Saio(saio) => {
                    for offset in &mut saio.offsets {
                        *offset += sequence_base;
                    }
                }
                // Track-level meta items (GIMI content ids) live in the sequence block too.
                BoxData::Iloc(iloc) => {
                    for item in &mut iloc.items {
                        for extent in &mut item.extents {
                            extent.offset += sequence_base;
                        }
                    }
                }
                _ => {}
            });
        }

        self.patch_tables(&mut w, &patches)?;

        Ok(w.into_data())
    }

    /// Fixes the width-sensitive fields before layout so that the patch pass rewrites tables
    /// of identical size.
    fn prepare_offset_widths(&mut self, wide: bool) {
        let long_item = self
            .item_payloads
            .values()
            .any(|d| d.len() as u64 > u32::MAX as u64);
        if let Some(iloc) = self
            .top_level_box_mut(FourCC::META)
            .and_then(|m| m.child_mut(FourCC::ILOC))
            .and_then(|b| b.as_iloc_mut())
        {
            iloc.offset_size = if wide { 8 } else { 4 };
            iloc.length_size = if long_item { 8 } else { 4 };
            iloc.base_offset_size = 4;
            iloc.index_size = 0;
        }
        if let Some(moov) = self.top_level_box_mut(FourCC::MOOV) {
            visit_mut(moov, &mut |node| {
                match &mut node.data {
                    BoxData::Stco(stco) => stco.co64 = wide,
                    BoxData::Saio(saio) => saio.wide_offsets = wide,
                    BoxData::Iloc(iloc) => iloc.offset_size = if wide { 8 } else { 4 },
                    _ => {}
                }
                // co64 changes the box type.
                if let BoxData::Stco(stco) = &node.data {
                    node.header.box_type = if stco.co64 {
                        FourCC::CO64
                    } else {
                        FourCC::STCO
                    };
                }
            });
        }
    }

    /// Rewrites the recorded `iloc`/`stco`/`saio` tables in place with their final offsets.
    fn patch_tables(&self, w: &mut StreamWriter, patches: &PatchPositions) -> Result<()> {
        let mut ilocs = Vec::new();
        let mut stcos = Vec::new();
        let mut saios = Vec::new();
        for top in &self.top_level {
            if skip_on_write(top) {
                continue;
            }
            visit(top, &mut |node| match &node.data {
                BoxData::Iloc(iloc) => ilocs.push((iloc, node.header.version())),
                BoxData::Stco(stco) => stcos.push(stco),
                BoxData::Saio(saio) => saios.push(saio),
                _ => {}
            });
        }

        if ilocs.len() != patches.iloc_tables.len()
            || stcos.len() != patches.stco_tables.len()
            || saios.len() != patches.saio_tables.len()
        {
            return Err(Error::usage("patch table bookkeeping out of sync"));
        }

        for ((iloc, version), &pos) in ilocs.iter().zip(&patches.iloc_tables) {
            w.set_position(pos);
            iloc.write_table(w, *version);
        }
        for (stco, &pos) in stcos.iter().zip(&patches.stco_tables) {
            w.set_position(pos);
            stco.write_table(w);
        }
        for (saio, &pos) in saios.iter().zip(&patches.saio_tables) {
            w.set_position(pos);
            saio.write_table(w);
        }
        w.set_position_to_end();
        Ok(())
    }
}

/// Top-level boxes excluded from serialization: the parsed `mdat` (replaced by a freshly
/// laid-out one) and a still-empty `meta` skeleton in sequence-only files.
fn skip_on_write(top: &HeifBox) -> bool {
    if top.fourcc() == FourCC::MDAT {
        return true;
    }
    if top.fourcc() == FourCC::META {
        let no_items = top
            .child(FourCC::IINF)
            .map(|iinf| iinf.children.is_empty())
            .unwrap_or(true);
        let no_primary = top
            .child(FourCC::PITM)
            .and_then(|b| b.as_pitm())
            .map(|pitm| pitm.item_id == 0)
            .unwrap_or(true);
        return no_items && no_primary;
    }
    false
}

/// Preorder traversal.
pub fn visit<'a>(node: &'a HeifBox, f: &mut impl FnMut(&'a HeifBox)) {
    f(node);
    for child in &node.children {
        visit(child, f);
    }
}

pub fn visit_mut(node: &mut HeifBox, f: &mut impl FnMut(&mut HeifBox)) {
    f(node);
    for child in &mut node.children {
        visit_mut(child, f);
    }
}

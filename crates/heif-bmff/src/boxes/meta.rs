//! Boxes that make up the `meta` item structure: handler, primary item, item locations,
//! item infos, references, property associations, item data and entity groups.

use heif_bitstream::{BitstreamRange, StreamWriter};

use crate::error::{Error, Result, Suberror};
use crate::fourcc::FourCC;
use crate::header::BoxHeader;
use crate::limits::SecurityLimits;

/// Handler reference box (`hdlr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlrBox {
    pub handler_type: FourCC,
    pub name: String,
}

impl HdlrBox {
    pub fn new(handler_type: FourCC) -> Self {
        Self {
            handler_type,
            name: String::new(),
        }
    }

    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let _pre_defined = range.read_u32();
        let handler_type = FourCC(range.read_fixed::<4>());
        range.skip(12); // reserved
        let name = range.read_nul_string();
        Ok(Self { handler_type, name })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_u32(0);
        w.write_bytes(&self.handler_type.0);
        w.write_u32(0);
        w.write_u32(0);
        w.write_u32(0);
        w.write_nul_string(&self.name);
    }
}

/// Primary item box (`pitm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitmBox {
    pub item_id: u32,
}

impl PitmBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 1)?;
        let item_id = if header.version() == 0 {
            range.read_u16() as u32
        } else {
            range.read_u32()
        };
        Ok(Self { item_id })
    }

    pub fn derived_version(&self) -> u8 {
        if self.item_id > 0xffff {
            1
        } else {
            0
        }
    }

    pub fn write(&self, w: &mut StreamWriter, version: u8) {
        if version == 0 {
            w.write_u16(self.item_id as u16);
        } else {
            w.write_u32(self.item_id);
        }
    }
}

/// Where an extent's offsets point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConstructionMethod {
    /// Offsets are absolute file positions (plus the item base offset).
    #[default]
    File,
    /// Offsets are relative to the payload of the `idat` box.
    Idat,
    /// Offsets address the data of another item, through the `iloc` of that item.
    Item,
}

impl ConstructionMethod {
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::File),
            1 => Some(Self::Idat),
            2 => Some(Self::Item),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::File => 0,
            Self::Idat => 1,
            Self::Item => 2,
        }
    }
}

/// One extent of an item: a (source, offset, length) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IlocExtent {
    pub index: u64,
    pub offset: u64,
    pub length: u64,
}

/// Location table row for one item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IlocItem {
    pub item_id: u32,
    pub construction_method: ConstructionMethod,
    pub data_reference_index: u16,
    pub base_offset: u64,
    pub extents: Vec<IlocExtent>,
}

/// Item location box (`iloc`).
///
/// The four width fields describe the serialized layout and are derived on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlocBox {
    pub offset_size: u8,
    pub length_size: u8,
    pub base_offset_size: u8,
    pub index_size: u8,
    pub items: Vec<IlocItem>,
}

impl Default for IlocBox {
    fn default() -> Self {
        Self {
            offset_size: 4,
            length_size: 4,
            base_offset_size: 4,
            index_size: 0,
            items: Vec::new(),
        }
    }
}

impl IlocBox {
    pub fn parse(
        range: &mut BitstreamRange<'_>,
        header: &mut BoxHeader,
        limits: &SecurityLimits,
    ) -> Result<Self> {
        header.read_full_checked(range, 2)?;
        let version = header.version();

        let widths = range.read_u16();
        let offset_size = ((widths >> 12) & 0xf) as u8;
        let length_size = ((widths >> 8) & 0xf) as u8;
        let base_offset_size = ((widths >> 4) & 0xf) as u8;
        let index_size = if version > 0 { (widths & 0xf) as u8 } else { 0 };

        for (name, value) in [
            ("offset_size", offset_size),
            ("length_size", length_size),
            ("base_offset_size", base_offset_size),
            ("index_size", index_size),
        ] {
            if !matches!(value, 0 | 4 | 8) {
                return Err(Error::parse(format!("iloc {name} of {value} is invalid")));
            }
        }

        let item_count = if version < 2 {
            range.read_u16() as u32
        } else {
            range.read_u32()
        };
        if item_count > limits.max_iloc_items {
            return Err(Error::limit(format!(
                "iloc box contains {item_count} items, exceeding the limit of {}",
                limits.max_iloc_items
            )));
        }

        let mut items = Vec::with_capacity(item_count as usize);
        for _ in 0..item_count {
            let mut item = IlocItem {
                item_id: if version < 2 {
                    range.read_u16() as u32
                } else {
                    range.read_u32()
                },
                ..Default::default()
            };

            if version >= 1 {
                let method = (range.read_u16() & 0xf) as u8;
                item.construction_method = ConstructionMethod::from_wire(method).ok_or_else(
                    || Error::parse(format!("unknown iloc construction method {method}")),
                )?;
            }

            item.data_reference_index = range.read_u16();
            item.base_offset = range.read_sized(base_offset_size);

            let extent_count = range.read_u16() as u32;
            if extent_count > limits.max_iloc_extents_per_item {
                return Err(Error::limit(format!(
                    "iloc item has {extent_count} extents, exceeding the limit of {}",
                    limits.max_iloc_extents_per_item
                )));
            }

            for _ in 0..extent_count {
                let mut extent = IlocExtent::default();
                if version > 0 && index_size > 0 {
                    extent.index = range.read_sized(index_size);
                }
                extent.offset = range.read_sized(offset_size);
                extent.length = range.read_sized(length_size);
                item.extents.push(extent);
            }

            if range.error() {
                break;
            }
            items.push(item);
        }

        Ok(Self {
            offset_size,
            length_size,
            base_offset_size,
            index_size,
            items,
        })
    }

    pub fn item(&self, item_id: u32) -> Option<&IlocItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }

    pub fn item_mut(&mut self, item_id: u32) -> Option<&mut IlocItem> {
        self.items.iter_mut().find(|item| item.item_id == item_id)
    }

    /// Derives the FullBox version from the stored items.
    pub fn derived_version(&self) -> u8 {
        let mut version = 0u8;
        if self.items.len() > 0xffff {
            version = 2;
        }
        for item in &self.items {
            if item.item_id > 0xffff {
                version = version.max(2);
            }
            if item.construction_method != ConstructionMethod::File {
                version = version.max(1);
            }
        }
        version
    }

    /// Serializes the location table. Called once while laying out the file with placeholder
    /// offsets and again when back-patching after `mdat` has been written; both passes must
    /// produce the same number of bytes, which holds because the width fields are fixed before
    /// the first pass.
    pub fn write_table(&self, w: &mut StreamWriter, version: u8) {
        w.write_u8((self.offset_size << 4) | self.length_size);
        w.write_u8((self.base_offset_size << 4) | self.index_size);

        if version < 2 {
            w.write_u16(self.items.len() as u16);
        } else {
            w.write_u32(self.items.len() as u32);
        }

        for item in &self.items {
            if version < 2 {
                w.write_u16(item.item_id as u16);
            } else {
                w.write_u32(item.item_id);
            }
            if version >= 1 {
                w.write_u16(item.construction_method.to_wire() as u16);
            }
            w.write_u16(item.data_reference_index);
            w.write_sized(self.base_offset_size, item.base_offset);
            w.write_u16(item.extents.len() as u16);
            for extent in &item.extents {
                if version >= 1 && self.index_size > 0 {
                    w.write_sized(self.index_size, extent.index);
                }
                w.write_sized(self.offset_size, extent.offset);
                w.write_sized(self.length_size, extent.length);
            }
        }
    }
}

/// Item info entry (`infe`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfeBox {
    pub item_id: u32,
    pub item_protection_index: u16,
    pub item_type: Option<FourCC>,
    pub item_name: String,
    pub content_type: String,
    pub content_encoding: String,
    pub item_uri_type: String,
    pub hidden: bool,
}

impl InfeBox {
    pub fn new(item_id: u32, item_type: FourCC) -> Self {
        Self {
            item_id,
            item_type: Some(item_type),
            ..Default::default()
        }
    }

    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 3)?;
        let version = header.version();
        let mut infe = InfeBox::default();

        if version <= 1 {
            infe.item_id = range.read_u16() as u32;
            infe.item_protection_index = range.read_u16();
            infe.item_name = range.read_nul_string();
            infe.content_type = range.read_nul_string();
            infe.content_encoding = range.read_nul_string();
        } else {
            infe.hidden = header.flags() & 1 != 0;
            infe.item_id = if version == 2 {
                range.read_u16() as u32
            } else {
                range.read_u32()
            };
            infe.item_protection_index = range.read_u16();
            let item_type = range.read_u32();
            if item_type != 0 {
                infe.item_type = Some(FourCC::from_u32(item_type));
            }
            infe.item_name = range.read_nul_string();
            if infe.item_type == Some(FourCC::MIME) {
                infe.content_type = range.read_nul_string();
                if !range.eof() {
                    infe.content_encoding = range.read_nul_string();
                }
            } else if infe.item_type == Some(FourCC::URI) {
                infe.item_uri_type = range.read_nul_string();
            }
        }

        Ok(infe)
    }

    pub fn derived_version(&self) -> (u8, u32) {
        let mut version = 0u8;
        if self.hidden || self.item_type.is_some() {
            version = 2;
        }
        if self.item_id > 0xffff {
            version = 3;
        }
        (version, if self.hidden { 1 } else { 0 })
    }

    pub fn write(&self, w: &mut StreamWriter, version: u8) {
        if version <= 1 {
            w.write_u16(self.item_id as u16);
            w.write_u16(self.item_protection_index);
            w.write_nul_string(&self.item_name);
            w.write_nul_string(&self.content_type);
            w.write_nul_string(&self.content_encoding);
            return;
        }

        if version == 2 {
            w.write_u16(self.item_id as u16);
        } else {
            w.write_u32(self.item_id);
        }
        w.write_u16(self.item_protection_index);
        match self.item_type {
            Some(fourcc) => w.write_u32(fourcc.to_u32()),
            None => w.write_u32(0),
        }
        w.write_nul_string(&self.item_name);
        if self.item_type == Some(FourCC::MIME) {
            w.write_nul_string(&self.content_type);
            w.write_nul_string(&self.content_encoding);
        } else if self.item_type == Some(FourCC::URI) {
            w.write_nul_string(&self.item_uri_type);
        }
    }
}

/// One typed reference edge set: `from_item` points at `to_items`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReference {
    pub ref_type: FourCC,
    pub from_item: u32,
    pub to_items: Vec<u32>,
}

/// Item reference box (`iref`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrefBox {
    pub references: Vec<ItemReference>,
}

impl IrefBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 1)?;
        let wide = header.version() > 0;

        let mut references = Vec::new();
        while !range.eof() && !range.error() {
            let child = BoxHeader::parse(range);
            let Some(content) = child.content_size() else {
                return Err(Error::invalid_input(
                    Suberror::InvalidBoxSize,
                    "reference box size smaller than its header",
                ));
            };
            let mut sub = range.sub_range(content);
            let from_item = if wide {
                sub.read_u32()
            } else {
                sub.read_u16() as u32
            };
            let count = sub.read_u16();
            let mut to_items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                to_items.push(if wide {
                    sub.read_u32()
                } else {
                    sub.read_u16() as u32
                });
            }
            if sub.error() {
                return Err(Error::truncated("truncated item reference box"));
            }
            sub.skip_to_end();
            references.push(ItemReference {
                ref_type: child.box_type,
                from_item,
                to_items,
            });
        }

        Ok(Self { references })
    }

    /// All reference targets of the given type originating at `from_item`, in order.
    pub fn references_from(&self, from_item: u32, ref_type: FourCC) -> &[u32] {
        self.references
            .iter()
            .find(|r| r.from_item == from_item && r.ref_type == ref_type)
            .map(|r| r.to_items.as_slice())
            .unwrap_or(&[])
    }

    /// All items of the given reference type pointing at `to_item`.
    pub fn referring_items(&self, to_item: u32, ref_type: FourCC) -> Vec<u32> {
        self.references
            .iter()
            .filter(|r| r.ref_type == ref_type && r.to_items.contains(&to_item))
            .map(|r| r.from_item)
            .collect()
    }

    pub fn add_reference(&mut self, from_item: u32, ref_type: FourCC, to_items: &[u32]) {
        if let Some(existing) = self
            .references
            .iter_mut()
            .find(|r| r.from_item == from_item && r.ref_type == ref_type)
        {
            existing.to_items.extend_from_slice(to_items);
            return;
        }
        self.references.push(ItemReference {
            ref_type,
            from_item,
            to_items: to_items.to_vec(),
        });
    }

    pub fn derived_version(&self) -> u8 {
        let wide = self.references.iter().any(|r| {
            r.from_item > 0xffff || r.to_items.iter().any(|&id| id > 0xffff)
        });
        if wide {
            1
        } else {
            0
        }
    }

    pub fn write(&self, w: &mut StreamWriter, version: u8) {
        let wide = version > 0;
        for reference in &self.references {
            let id_size = if wide { 4 } else { 2 };
            let size = 8 + id_size + 2 + reference.to_items.len() * id_size;
            w.write_u32(size as u32);
            w.write_bytes(&reference.ref_type.0);
            if wide {
                w.write_u32(reference.from_item);
            } else {
                w.write_u16(reference.from_item as u16);
            }
            w.write_u16(reference.to_items.len() as u16);
            for &to in &reference.to_items {
                if wide {
                    w.write_u32(to);
                } else {
                    w.write_u16(to as u16);
                }
            }
        }
    }
}

/// One (essential, property index) association. Indices are 1-based into `ipco`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAssociation {
    pub essential: bool,
    pub property_index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmaEntry {
    pub item_id: u32,
    pub associations: Vec<PropertyAssociation>,
}

/// Item property association box (`ipma`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpmaBox {
    pub entries: Vec<IpmaEntry>,
}

impl IpmaBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 1)?;
        let wide_ids = header.version() >= 1;
        let wide_indices = header.flags() & 1 != 0;

        let entry_count = range.read_u32();
        let mut entries = Vec::new();
        for _ in 0..entry_count {
            if range.eof() || range.error() {
                break;
            }
            let item_id = if wide_ids {
                range.read_u32()
            } else {
                range.read_u16() as u32
            };
            let assoc_count = range.read_u8();
            let mut associations = Vec::with_capacity(assoc_count as usize);
            for _ in 0..assoc_count {
                let (essential, property_index) = if wide_indices {
                    let v = range.read_u16();
                    (v & 0x8000 != 0, v & 0x7fff)
                } else {
                    let v = range.read_u8() as u16;
                    (v & 0x80 != 0, v & 0x7f)
                };
                associations.push(PropertyAssociation {
                    essential,
                    property_index,
                });
            }
            entries.push(IpmaEntry {
                item_id,
                associations,
            });
        }

        Ok(Self { entries })
    }

    pub fn associations_for(&self, item_id: u32) -> Option<&[PropertyAssociation]> {
        self.entries
            .iter()
            .find(|e| e.item_id == item_id)
            .map(|e| e.associations.as_slice())
    }

    pub fn add_association(&mut self, item_id: u32, association: PropertyAssociation) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.item_id == item_id) {
            entry.associations.push(association);
            return;
        }
        self.entries.push(IpmaEntry {
            item_id,
            associations: vec![association],
        });
    }

    pub fn derived_version(&self) -> (u8, u32) {
        let wide_ids = self.entries.iter().any(|e| e.item_id > 0xffff);
        let wide_indices = self
            .entries
            .iter()
            .flat_map(|e| &e.associations)
            .any(|a| a.property_index > 0x7f);
        (u8::from(wide_ids), u32::from(wide_indices))
    }

    pub fn write(&self, w: &mut StreamWriter, version: u8, flags: u32) {
        w.write_u32(self.entries.len() as u32);
        for entry in &self.entries {
            if version >= 1 {
                w.write_u32(entry.item_id);
            } else {
                w.write_u16(entry.item_id as u16);
            }
            w.write_u8(entry.associations.len() as u8);
            for assoc in &entry.associations {
                if flags & 1 != 0 {
                    let essential = if assoc.essential { 0x8000 } else { 0 };
                    w.write_u16(essential | (assoc.property_index & 0x7fff));
                } else {
                    let essential = if assoc.essential { 0x80 } else { 0 };
                    w.write_u8(essential | (assoc.property_index & 0x7f) as u8);
                }
            }
        }
    }
}

/// Item data box (`idat`). Only the position of the payload is recorded; the bytes stay in the
/// underlying source and are fetched on extent dereference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdatBox {
    pub data_start: u64,
    pub data_len: u64,
}

impl IdatBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let idat = Self {
            data_start: range.position(),
            data_len: range.remaining(),
        };
        range.skip_to_end();
        Ok(idat)
    }
}

/// Media data box (`mdat`), handled like `idat`: position only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MdatBox {
    pub data_start: u64,
    pub data_len: u64,
}

impl MdatBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let mdat = Self {
            data_start: range.position(),
            data_len: range.remaining(),
        };
        range.skip_to_end();
        Ok(mdat)
    }
}

/// One entity group of the `grpl` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityGroup {
    pub group_type: FourCC,
    pub group_id: u32,
    pub entity_ids: Vec<u32>,
}

/// Groups list box (`grpl`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GrplBox {
    pub groups: Vec<EntityGroup>,
}

impl GrplBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let mut groups = Vec::new();
        while !range.eof() && !range.error() {
            let mut child = BoxHeader::parse(range);
            let Some(content) = child.content_size() else {
                return Err(Error::invalid_input(
                    Suberror::InvalidBoxSize,
                    "entity group size smaller than its header",
                ));
            };
            let mut sub = range.sub_range(content);
            child.read_full(&mut sub);
            let group_id = sub.read_u32();
            let count = sub.read_u32();
            let mut entity_ids = Vec::new();
            for _ in 0..count {
                if sub.eof() || sub.error() {
                    break;
                }
                entity_ids.push(sub.read_u32());
            }
            if sub.error() {
                return Err(Error::truncated("truncated entity group"));
            }
            sub.skip_to_end();
            groups.push(EntityGroup {
                group_type: child.box_type,
                group_id,
                entity_ids,
            });
        }
        Ok(Self { groups })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        for group in &self.groups {
            let size = 12 + 4 + 4 + group.entity_ids.len() * 4;
            w.write_u32(size as u32);
            w.write_bytes(&group.group_type.0);
            w.write_u32(0); // version 0, no flags
            w.write_u32(group.group_id);
            w.write_u32(group.entity_ids.len() as u32);
            for &id in &group.entity_ids {
                w.write_u32(id);
            }
        }
    }
}

/// Data entry URL box (`url `).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UrlBox {
    pub self_contained: bool,
    pub location: Option<String>,
}

impl UrlBox {
    pub fn parse(range: &mut BitstreamRange<'_>, header: &mut BoxHeader) -> Result<Self> {
        header.read_full_checked(range, 0)?;
        let self_contained = header.flags() & 1 != 0;
        let location = if self_contained || range.eof() {
            None
        } else {
            Some(range.read_nul_string())
        };
        Ok(Self {
            self_contained,
            location,
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        if let Some(location) = &self.location {
            w.write_nul_string(location);
        }
    }
}

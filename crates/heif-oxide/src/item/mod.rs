//! The logical image graph built from the parsed `meta` box: items, their properties,
//! references, derivations and metadata attachments.

pub mod derived;
pub mod unci;

use std::collections::{BTreeMap, HashSet};

use heif_bmff::boxes::{ClapBox, EntityGroup, HeifBox, HvcCBox, IrefBox, IspeBox};
use heif_bmff::{Error, FourCC, Result, Suberror};
use heif_image::MirrorAxis;

use crate::file::HeifFile;
use derived::ImageGrid;

/// Role an auxiliary image plays for its master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuxRole {
    #[default]
    None,
    Alpha,
    Depth,
    Other,
}

/// One logical item of the file, with its interpreted relations.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub id: u32,
    pub item_type: Option<FourCC>,
    pub name: String,
    pub content_type: String,
    pub item_uri_type: String,
    pub hidden: bool,
    /// Nominal size from `ispe`, before transforms.
    pub width: u32,
    pub height: u32,
    /// Ordered `(essential, property)` pairs resolved through `ipma`.
    pub properties: Vec<(bool, HeifBox)>,

    pub thumbnails: Vec<u32>,
    pub thumbnail_of: Option<u32>,
    pub aux_images: Vec<u32>,
    pub aux_of: Option<u32>,
    pub aux_role: AuxRole,
    pub alpha_image: Option<u32>,
    pub depth_image: Option<u32>,
    pub premultiplied_alpha: bool,
    /// Metadata items (`Exif`, XMP, ...) describing this image.
    pub metadata: Vec<u32>,
    /// Region annotation items describing this image.
    pub regions: Vec<u32>,
    /// For `cdsc` sources: the image this item describes.
    pub describes: Option<u32>,
    /// For region items: the mask image attached via a `mask` reference.
    pub mask_image: Option<u32>,
    /// For derived images: the `dimg` sources, in reference order.
    pub sources: Vec<u32>,
}

impl ImageItem {
    fn from_infe(infe: &heif_bmff::boxes::InfeBox) -> Self {
        Self {
            id: infe.item_id,
            item_type: infe.item_type,
            name: infe.item_name.clone(),
            content_type: infe.content_type.clone(),
            item_uri_type: infe.item_uri_type.clone(),
            hidden: infe.hidden,
            width: 0,
            height: 0,
            properties: Vec::new(),
            thumbnails: Vec::new(),
            thumbnail_of: None,
            aux_images: Vec::new(),
            aux_of: None,
            aux_role: AuxRole::None,
            alpha_image: None,
            depth_image: None,
            premultiplied_alpha: false,
            metadata: Vec::new(),
            regions: Vec::new(),
            describes: None,
            mask_image: None,
            sources: Vec::new(),
        }
    }

    /// Whether this item's type is one of the image kinds (coded, derived, uncompressed,
    /// mask).
    pub fn is_image(&self) -> bool {
        matches!(
            self.item_type,
            Some(
                FourCC::HVC1
                    | FourCC::HEV1
                    | FourCC::AV01
                    | FourCC::JPEG
                    | FourCC::J2K1
                    | FourCC::VVC1
                    | FourCC::GRID
                    | FourCC::IDEN
                    | FourCC::IOVL
                    | FourCC::UNCI
                    | FourCC::MSKI
            )
        )
    }

    pub fn is_derived(&self) -> bool {
        matches!(
            self.item_type,
            Some(FourCC::GRID | FourCC::IDEN | FourCC::IOVL)
        )
    }

    fn property<T, F: Fn(&HeifBox) -> Option<&T>>(&self, f: F) -> Option<&T> {
        self.properties.iter().find_map(|(_, p)| f(p))
    }

    pub fn ispe(&self) -> Option<&IspeBox> {
        self.property(HeifBox::as_ispe)
    }

    pub fn hvcc(&self) -> Option<&HvcCBox> {
        self.property(HeifBox::as_hvcc)
    }

    pub fn colr(&self) -> Option<&HeifBox> {
        self.properties
            .iter()
            .map(|(_, p)| p)
            .find(|p| p.fourcc() == FourCC::COLR)
    }

    pub fn pixi_bit_depth(&self) -> Option<u8> {
        self.property(HeifBox::as_pixi)
            .and_then(|pixi| pixi.bits_per_channel.first())
            .copied()
    }

    pub fn clap(&self) -> Option<&ClapBox> {
        self.property(HeifBox::as_clap)
    }

    pub fn rotation_ccw(&self) -> u32 {
        self.property(HeifBox::as_irot)
            .map(|irot| irot.degrees_ccw())
            .unwrap_or(0)
    }

    pub fn mirror_axis(&self) -> Option<MirrorAxis> {
        self.property(HeifBox::as_imir).map(|imir| imir.axis)
    }
}

/// The interpreted item graph of one file.
#[derive(Debug, Clone, Default)]
pub struct ItemModel {
    pub items: BTreeMap<u32, ImageItem>,
    pub primary_id: u32,
    pub entity_groups: Vec<EntityGroup>,
}

impl ItemModel {
    pub fn item(&self, id: u32) -> Option<&ImageItem> {
        self.items.get(&id)
    }

    pub fn primary(&self) -> Option<&ImageItem> {
        self.items.get(&self.primary_id)
    }

    /// Image items that are not hidden and not subordinate (thumbnails, auxiliaries).
    pub fn top_level_image_ids(&self) -> Vec<u32> {
        self.items
            .values()
            .filter(|item| {
                item.is_image()
                    && !item.hidden
                    && item.thumbnail_of.is_none()
                    && item.aux_of.is_none()
            })
            .map(|item| item.id)
            .collect()
    }
}

/// Builds the item graph from the parsed file: enumeration, property resolution, reference
/// edges, and the structural validity checks.
pub fn interpret(file: &HeifFile) -> Result<ItemModel> {
    let mut model = ItemModel::default();

    for infe in file.infe_items()? {
        if infe.item_id == 0 {
            return Err(Error::parse("item id 0 is not allowed"));
        }
        if model.items.contains_key(&infe.item_id) {
            return Err(Error::parse(format!("duplicate item id {}", infe.item_id)));
        }
        model.items.insert(infe.item_id, ImageItem::from_infe(infe));
    }

    model.primary_id = file.primary_item_id().unwrap_or(0);
    if model.items.is_empty() && model.primary_id == 0 {
        // Sequence-only files carry an empty meta; there is nothing to interpret.
        return Ok(model);
    }

    // Primary item: must exist and be an image.
    let primary = model.items.get(&model.primary_id).ok_or_else(|| {
        Error::invalid_input(
            Suberror::NonexistentItemReferenced,
            format!("pitm points at nonexistent item {}", model.primary_id),
        )
    })?;
    if !primary.is_image() {
        return Err(Error::invalid_input(
            Suberror::UnsupportedImageType,
            "primary item is not an image",
        ));
    }

    // Properties, dimensions and color information.
    let ids: Vec<u32> = model.items.keys().copied().collect();
    for &id in &ids {
        let properties = file.properties_for_item(id)?;
        let item = model.items.get_mut(&id).unwrap();
        item.properties = properties
            .into_iter()
            .map(|(essential, p)| (essential, p.clone()))
            .collect();
        if let Some(ispe) = item.ispe() {
            let (w, h) = (ispe.width, ispe.height);
            item.width = w;
            item.height = h;
        }
        let limits = file.limits();
        if item.width > limits.max_image_width || item.height > limits.max_image_height {
            return Err(Error::limit(format!(
                "item {id} of {}x{} exceeds the maximum image size",
                item.width, item.height
            )));
        }
    }

    // Reference edges.
    if let Ok(iref_box) = file.meta_child(FourCC::IREF) {
        let iref = iref_box
            .as_iref()
            .ok_or_else(|| Error::missing_box(FourCC::IREF))?;
        apply_references(&mut model, iref)?;
        check_derivation_cycles(&model, iref)?;
    }

    // A primary that is itself auxiliary is invalid.
    let primary = &model.items[&model.primary_id];
    if primary.aux_of.is_some() {
        return Err(Error::invalid_input(
            Suberror::UnsupportedImageType,
            "primary item is an auxiliary image",
        ));
    }

    // Grid structure checks and color-profile propagation.
    for &id in &ids {
        let item = &model.items[&id];
        if item.item_type == Some(FourCC::GRID) {
            let grid = ImageGrid::parse(&file.read_item_data(id)?)?;
            if item.sources.len() as u32 != grid.tile_count() {
                return Err(Error::invalid_input(
                    Suberror::MissingGridTiles,
                    format!(
                        "grid of {}x{} declares {} tiles but references {}",
                        grid.rows,
                        grid.columns,
                        grid.tile_count(),
                        item.sources.len()
                    ),
                ));
            }
            if item.colr().is_none() {
                if let Some(profile) = item
                    .sources
                    .first()
                    .and_then(|first| model.items.get(first))
                    .and_then(|tile| tile.colr())
                    .cloned()
                {
                    model
                        .items
                        .get_mut(&id)
                        .unwrap()
                        .properties
                        .push((false, profile));
                }
            }
        }
    }

    // Entity groups.
    if let Ok(grpl) = file.meta_child(FourCC::GRPL) {
        if let Some(grpl) = grpl.as_grpl() {
            model.entity_groups = grpl.groups.clone();
        }
    }

    Ok(model)
}

fn apply_references(model: &mut ItemModel, iref: &IrefBox) -> Result<()> {
    for reference in &iref.references {
        let from = reference.from_item;
        for &to in &reference.to_items {
            if !model.items.contains_key(&to) || !model.items.contains_key(&from) {
                return Err(Error::invalid_input(
                    Suberror::NonexistentItemReferenced,
                    format!(
                        "'{}' reference {from} -> {to} names a nonexistent item",
                        reference.ref_type
                    ),
                ));
            }
        }

        match reference.ref_type {
            FourCC::THMB => {
                let Some(&to) = reference.to_items.first() else {
                    continue;
                };
                if to == from {
                    return Err(Error::invalid_input(
                        Suberror::ReferenceCycle,
                        "thumbnail references itself",
                    ));
                }
                if model.items[&to].thumbnail_of.is_some() {
                    return Err(Error::invalid_input(
                        Suberror::ReferenceCycle,
                        "thumbnail of a thumbnail",
                    ));
                }
                model.items.get_mut(&from).unwrap().thumbnail_of = Some(to);
                model.items.get_mut(&to).unwrap().thumbnails.push(from);
            }
            FourCC::AUXL => {
                let Some(&to) = reference.to_items.first() else {
                    continue;
                };
                let role = {
                    let item = &model.items[&from];
                    match item.property(HeifBox::as_auxc) {
                        Some(auxc) if auxc.is_alpha() => AuxRole::Alpha,
                        Some(auxc) if auxc.is_depth() => AuxRole::Depth,
                        Some(_) => AuxRole::Other,
                        None => {
                            return Err(Error::invalid_input(
                                Suberror::InvalidProperty,
                                format!("auxiliary item {from} carries no auxC property"),
                            ));
                        }
                    }
                };
                {
                    let item = model.items.get_mut(&from).unwrap();
                    item.aux_of = Some(to);
                    item.aux_role = role;
                }
                let master = model.items.get_mut(&to).unwrap();
                master.aux_images.push(from);
                match role {
                    AuxRole::Alpha => master.alpha_image = Some(from),
                    AuxRole::Depth => master.depth_image = Some(from),
                    _ => {}
                }
            }
            FourCC::CDSC => {
                for &to in &reference.to_items {
                    let is_region = model.items[&from].item_type == Some(FourCC::RGAN);
                    model.items.get_mut(&from).unwrap().describes = Some(to);
                    let target = model.items.get_mut(&to).unwrap();
                    if is_region {
                        target.regions.push(from);
                    } else {
                        target.metadata.push(from);
                    }
                }
            }
            FourCC::PREM => {
                // from = master image, to = its alpha auxiliary; the master's alpha is
                // premultiplied.
                model.items.get_mut(&from).unwrap().premultiplied_alpha = true;
            }
            FourCC::DIMG => {
                model.items.get_mut(&from).unwrap().sources = reference.to_items.clone();
            }
            FourCC::MASK => {
                let Some(&to) = reference.to_items.first() else {
                    continue;
                };
                model.items.get_mut(&from).unwrap().mask_image = Some(to);
            }
            other => {
                tracing::debug!(ref_type = %other, "Ignoring unknown item reference type");
            }
        }
    }
    Ok(())
}

/// The derivation graph over `dimg` edges must be a DAG.
fn check_derivation_cycles(model: &ItemModel, _iref: &IrefBox) -> Result<()> {
    fn dfs(
        model: &ItemModel,
        id: u32,
        stack: &mut Vec<u32>,
        done: &mut HashSet<u32>,
    ) -> Result<()> {
        if done.contains(&id) {
            return Ok(());
        }
        if stack.contains(&id) {
            return Err(Error::invalid_input(
                Suberror::ReferenceCycle,
                format!("derivation cycle through item {id}"),
            ));
        }
        stack.push(id);
        if let Some(item) = model.items.get(&id) {
            for &source in &item.sources {
                dfs(model, source, stack, done)?;
            }
        }
        stack.pop();
        done.insert(id);
        Ok(())
    }

    let mut done = HashSet::new();
    for &id in model.items.keys() {
        dfs(model, id, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}

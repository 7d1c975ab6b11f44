//! The typed box tree.
//!
//! Every parsed box becomes a [`HeifBox`]: a generic header, a [`BoxData`] variant keyed by the
//! box type, and an ordered child list. Unknown box types are preserved opaquely and skipped by
//! semantic processing.

use heif_bitstream::{BitstreamRange, StreamWriter};

use crate::error::{Error, Result, Suberror};
use crate::fourcc::FourCC;
use crate::header::BoxHeader;
use crate::limits::SecurityLimits;

mod codec;
mod ftyp;
mod meta;
mod properties;

pub use codec::{Av1CBox, HvcCBox, NalArray, VvcCBox};
pub use ftyp::FtypBox;
pub use meta::{
    ConstructionMethod, EntityGroup, GrplBox, HdlrBox, IdatBox, IlocBox, IlocExtent, IlocItem,
    InfeBox, IpmaBox, IpmaEntry, IrefBox, ItemReference, MdatBox, PitmBox, PropertyAssociation,
    UrlBox,
};
pub use properties::{
    component_type, AuxCBox, ClapBox, ClliBox, CmpdBox, CmpdComponent, ColrBox, Fraction, ImirBox,
    IrotBox, IspeBox, MdcvBox, PaspBox, PixiBox, UncCBox, UncCComponent, AUX_TYPE_ALPHA,
    AUX_TYPE_DEPTH,
};

mod movie;
pub use movie::{
    ItaiBox, MdhdBox, MvhdBox, SaioBox, SaizBox, StcoBox, StscBox, StscEntry, StsdBox, StssBox,
    StszBox, SttsBox, TaicBox, TkhdBox, TrackReference, TrefBox, UriBox, UrimBox,
    VisualSampleEntryBox, VmhdBox, IDENTITY_MATRIX,
};

/// An opaque box whose type the registry does not know. The payload is preserved for
/// serialization but never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnknownBox {
    pub payload: Vec<u8>,
}

/// Payload variant of a box, discriminated by its four-character code.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum BoxData {
    Ftyp(FtypBox),
    Meta,
    Hdlr(HdlrBox),
    Pitm(PitmBox),
    Iloc(IlocBox),
    Iinf,
    Infe(InfeBox),
    Iref(IrefBox),
    Iprp,
    Ipco,
    Ipma(IpmaBox),
    Idat(IdatBox),
    Grpl(GrplBox),
    Dinf,
    Dref,
    Url(UrlBox),
    Ispe(IspeBox),
    Colr(ColrBox),
    Pixi(PixiBox),
    Pasp(PaspBox),
    Clli(ClliBox),
    Mdcv(MdcvBox),
    AuxC(AuxCBox),
    Irot(IrotBox),
    Imir(ImirBox),
    Clap(ClapBox),
    Cmpd(CmpdBox),
    UncC(UncCBox),
    HvcC(HvcCBox),
    Av1C(Av1CBox),
    VvcC(VvcCBox),
    J2kH,
    Moov,
    Mvhd(MvhdBox),
    Trak,
    Tkhd(TkhdBox),
    Tref(TrefBox),
    Mdia,
    Mdhd(MdhdBox),
    Minf,
    Vmhd(VmhdBox),
    Nmhd,
    Stbl,
    Stsd(StsdBox),
    VisualSampleEntry(VisualSampleEntryBox),
    Urim(UrimBox),
    Uri(UriBox),
    Stts(SttsBox),
    Stsc(StscBox),
    Stco(StcoBox),
    Stss(StssBox),
    Stsz(StszBox),
    Saiz(SaizBox),
    Saio(SaioBox),
    Taic(TaicBox),
    Itai(ItaiBox),
    Mdat(MdatBox),
    Unknown(UnknownBox),
}

/// A box node: header, typed payload and ordered children.
#[derive(Debug, Clone, PartialEq)]
pub struct HeifBox {
    pub header: BoxHeader,
    pub data: BoxData,
    pub children: Vec<HeifBox>,
}

/// Positions of back-patchable tables recorded while serializing, in document order.
///
/// Each entry is the writer position where the corresponding table payload starts. The patch
/// pass pairs them with the boxes of the tree in the same traversal order.
#[derive(Debug, Clone, Default)]
pub struct PatchPositions {
    pub iloc_tables: Vec<usize>,
    pub stco_tables: Vec<usize>,
    pub saio_tables: Vec<usize>,
}

impl HeifBox {
    /// Creates a node for writing. The header (including FullBox defaults) is derived from the
    /// payload variant; use [`with_fourcc`][Self::with_fourcc] for variants whose box type is
    /// not implied by the data, like sample entries.
    pub fn new(data: BoxData) -> Self {
        let fourcc = implied_fourcc(&data)
            .expect("box type is not implied by this payload; use with_fourcc");
        Self::with_fourcc(fourcc, data)
    }

    pub fn with_fourcc(fourcc: FourCC, data: BoxData) -> Self {
        let header = make_header(fourcc, &data);
        Self {
            header,
            data,
            children: Vec::new(),
        }
    }

    pub fn with_children(data: BoxData, children: Vec<HeifBox>) -> Self {
        let mut node = Self::new(data);
        node.children = children;
        node
    }

    pub fn fourcc(&self) -> FourCC {
        self.header.box_type
    }

    /// First direct child with the given box type.
    pub fn child(&self, fourcc: FourCC) -> Option<&HeifBox> {
        self.children.iter().find(|c| c.fourcc() == fourcc)
    }

    pub fn child_mut(&mut self, fourcc: FourCC) -> Option<&mut HeifBox> {
        self.children.iter_mut().find(|c| c.fourcc() == fourcc)
    }

    pub fn children_of(&self, fourcc: FourCC) -> impl Iterator<Item = &HeifBox> {
        self.children.iter().filter(move |c| c.fourcc() == fourcc)
    }

    pub fn append_child(&mut self, child: HeifBox) -> &mut HeifBox {
        self.children.push(child);
        self.children.last_mut().unwrap()
    }
}

macro_rules! typed_accessors {
    ($($variant:ident => $ty:ty, $as:ident, $as_mut:ident;)*) => {
        impl HeifBox {
            $(
                pub fn $as(&self) -> Option<&$ty> {
                    match &self.data {
                        BoxData::$variant(b) => Some(b),
                        _ => None,
                    }
                }

                pub fn $as_mut(&mut self) -> Option<&mut $ty> {
                    match &mut self.data {
                        BoxData::$variant(b) => Some(b),
                        _ => None,
                    }
                }
            )*
        }
    };
}

typed_accessors! {
    Ftyp => FtypBox, as_ftyp, as_ftyp_mut;
    Hdlr => HdlrBox, as_hdlr, as_hdlr_mut;
    Pitm => PitmBox, as_pitm, as_pitm_mut;
    Iloc => IlocBox, as_iloc, as_iloc_mut;
    Infe => InfeBox, as_infe, as_infe_mut;
    Iref => IrefBox, as_iref, as_iref_mut;
    Ipma => IpmaBox, as_ipma, as_ipma_mut;
    Idat => IdatBox, as_idat, as_idat_mut;
    Grpl => GrplBox, as_grpl, as_grpl_mut;
    Ispe => IspeBox, as_ispe, as_ispe_mut;
    Colr => ColrBox, as_colr, as_colr_mut;
    Pixi => PixiBox, as_pixi, as_pixi_mut;
    Pasp => PaspBox, as_pasp, as_pasp_mut;
    Clli => ClliBox, as_clli, as_clli_mut;
    Mdcv => MdcvBox, as_mdcv, as_mdcv_mut;
    AuxC => AuxCBox, as_auxc, as_auxc_mut;
    Irot => IrotBox, as_irot, as_irot_mut;
    Imir => ImirBox, as_imir, as_imir_mut;
    Clap => ClapBox, as_clap, as_clap_mut;
    Cmpd => CmpdBox, as_cmpd, as_cmpd_mut;
    UncC => UncCBox, as_uncc, as_uncc_mut;
    HvcC => HvcCBox, as_hvcc, as_hvcc_mut;
    Av1C => Av1CBox, as_av1c, as_av1c_mut;
    VvcC => VvcCBox, as_vvcc, as_vvcc_mut;
    Mvhd => MvhdBox, as_mvhd, as_mvhd_mut;
    Tkhd => TkhdBox, as_tkhd, as_tkhd_mut;
    Tref => TrefBox, as_tref, as_tref_mut;
    Mdhd => MdhdBox, as_mdhd, as_mdhd_mut;
    VisualSampleEntry => VisualSampleEntryBox, as_visual_sample_entry, as_visual_sample_entry_mut;
    Urim => UrimBox, as_urim, as_urim_mut;
    Uri => UriBox, as_uri, as_uri_mut;
    Stts => SttsBox, as_stts, as_stts_mut;
    Stsc => StscBox, as_stsc, as_stsc_mut;
    Stco => StcoBox, as_stco, as_stco_mut;
    Stss => StssBox, as_stss, as_stss_mut;
    Stsz => StszBox, as_stsz, as_stsz_mut;
    Saiz => SaizBox, as_saiz, as_saiz_mut;
    Saio => SaioBox, as_saio, as_saio_mut;
    Taic => TaicBox, as_taic, as_taic_mut;
    Itai => ItaiBox, as_itai, as_itai_mut;
    Mdat => MdatBox, as_mdat, as_mdat_mut;
}

fn implied_fourcc(data: &BoxData) -> Option<FourCC> {
    Some(match data {
        BoxData::Ftyp(_) => FourCC::FTYP,
        BoxData::Meta => FourCC::META,
        BoxData::Hdlr(_) => FourCC::HDLR,
        BoxData::Pitm(_) => FourCC::PITM,
        BoxData::Iloc(_) => FourCC::ILOC,
        BoxData::Iinf => FourCC::IINF,
        BoxData::Infe(_) => FourCC::INFE,
        BoxData::Iref(_) => FourCC::IREF,
        BoxData::Iprp => FourCC::IPRP,
        BoxData::Ipco => FourCC::IPCO,
        BoxData::Ipma(_) => FourCC::IPMA,
        BoxData::Idat(_) => FourCC::IDAT,
        BoxData::Grpl(_) => FourCC::GRPL,
        BoxData::Dinf => FourCC::DINF,
        BoxData::Dref => FourCC::DREF,
        BoxData::Url(_) => FourCC::URL,
        BoxData::Ispe(_) => FourCC::ISPE,
        BoxData::Colr(_) => FourCC::COLR,
        BoxData::Pixi(_) => FourCC::PIXI,
        BoxData::Pasp(_) => FourCC::PASP,
        BoxData::Clli(_) => FourCC::CLLI,
        BoxData::Mdcv(_) => FourCC::MDCV,
        BoxData::AuxC(_) => FourCC::AUXC,
        BoxData::Irot(_) => FourCC::IROT,
        BoxData::Imir(_) => FourCC::IMIR,
        BoxData::Clap(_) => FourCC::CLAP,
        BoxData::Cmpd(_) => FourCC::CMPD,
        BoxData::UncC(_) => FourCC::UNCC,
        BoxData::HvcC(_) => FourCC::HVCC,
        BoxData::Av1C(_) => FourCC::AV1C,
        BoxData::VvcC(_) => FourCC::VVCC,
        BoxData::J2kH => FourCC::J2KH,
        BoxData::Moov => FourCC::MOOV,
        BoxData::Mvhd(_) => FourCC::MVHD,
        BoxData::Trak => FourCC::TRAK,
        BoxData::Tkhd(_) => FourCC::TKHD,
        BoxData::Tref(_) => FourCC::TREF,
        BoxData::Mdia => FourCC::MDIA,
        BoxData::Mdhd(_) => FourCC::MDHD,
        BoxData::Minf => FourCC::MINF,
        BoxData::Vmhd(_) => FourCC::VMHD,
        BoxData::Nmhd => FourCC::NMHD,
        BoxData::Stbl => FourCC::STBL,
        BoxData::Stsd(_) => FourCC::STSD,
        BoxData::Urim(_) => FourCC::URIM,
        BoxData::Uri(_) => FourCC::URI,
        BoxData::Stts(_) => FourCC::STTS,
        BoxData::Stsc(_) => FourCC::STSC,
        BoxData::Stco(StcoBox { co64: false, .. }) => FourCC::STCO,
        BoxData::Stco(StcoBox { co64: true, .. }) => FourCC::CO64,
        BoxData::Stss(_) => FourCC::STSS,
        BoxData::Stsz(_) => FourCC::STSZ,
        BoxData::Saiz(_) => FourCC::SAIZ,
        BoxData::Saio(_) => FourCC::SAIO,
        BoxData::Taic(_) => FourCC::TAIC,
        BoxData::Itai(_) => FourCC::ITAI,
        BoxData::Mdat(_) => FourCC::MDAT,
        BoxData::VisualSampleEntry(_) | BoxData::Unknown(_) => return None,
    })
}

fn make_header(fourcc: FourCC, data: &BoxData) -> BoxHeader {
    match data {
        // FullBoxes; versions are refined by `derive_versions` before writing.
        BoxData::Meta
        | BoxData::Hdlr(_)
        | BoxData::Pitm(_)
        | BoxData::Iloc(_)
        | BoxData::Iinf
        | BoxData::Infe(_)
        | BoxData::Iref(_)
        | BoxData::Ipma(_)
        | BoxData::Dref
        | BoxData::Url(_)
        | BoxData::Ispe(_)
        | BoxData::Pixi(_)
        | BoxData::AuxC(_)
        | BoxData::UncC(_)
        | BoxData::VvcC(_)
        | BoxData::Mvhd(_)
        | BoxData::Mdhd(_)
        | BoxData::Nmhd
        | BoxData::Stsd(_)
        | BoxData::Uri(_)
        | BoxData::Stts(_)
        | BoxData::Stsc(_)
        | BoxData::Stco(_)
        | BoxData::Stss(_)
        | BoxData::Stsz(_)
        | BoxData::Saiz(_)
        | BoxData::Saio(_)
        | BoxData::Taic(_)
        | BoxData::Itai(_) => BoxHeader::full_box(fourcc, 0, 0),
        BoxData::Tkhd(_) => BoxHeader::full_box(fourcc, 0, 3), // enabled + in movie
        BoxData::Vmhd(_) => BoxHeader::full_box(fourcc, 0, 1),
        _ => BoxHeader::new(fourcc),
    }
}

/// Reads one box, dispatching on its four-character code.
pub fn read_box(
    range: &mut BitstreamRange<'_>,
    limits: &SecurityLimits,
    depth: u32,
) -> Result<HeifBox> {
    if depth > limits.max_box_depth {
        return Err(Error::new(
            crate::error::ErrorKind::MemoryAllocation,
            Suberror::TooDeeplyNested,
            "maximum box nesting depth exceeded",
        ));
    }

    let mut header = BoxHeader::parse(range);
    if range.error() {
        return Err(Error::truncated("truncated box header"));
    }

    if header.size == 0 {
        // Extends to the end of the enclosing range.
        header.size = header.header_size as u64 + range.remaining();
    }

    let Some(content_size) = header.content_size() else {
        return Err(Error::invalid_input(
            Suberror::InvalidBoxSize,
            format!(
                "box size ({}) smaller than header size ({})",
                header.size, header.header_size
            ),
        ));
    };
    if content_size > range.remaining() {
        return Err(Error::invalid_input(
            Suberror::InvalidBoxSize,
            format!("box '{}' exceeds its enclosing range", header.box_type),
        ));
    }

    tracing::trace!(box_type = %header.box_type, size = header.size, depth, "Reading box");

    let mut rng = range.sub_range(content_size);
    let (data, children) = parse_payload(&mut rng, &mut header, limits, depth)?;

    if rng.error() {
        return Err(Error::truncated(format!(
            "truncated '{}' box",
            header.box_type
        )));
    }
    rng.skip_to_end();

    Ok(HeifBox {
        header,
        data,
        children,
    })
}

fn parse_payload(
    rng: &mut BitstreamRange<'_>,
    header: &mut BoxHeader,
    limits: &SecurityLimits,
    depth: u32,
) -> Result<(BoxData, Vec<HeifBox>)> {
    let no_children = Vec::new();
    Ok(match header.box_type {
        FourCC::FTYP => (BoxData::Ftyp(FtypBox::parse(rng)?), no_children),
        FourCC::META => {
            header.read_full_checked(rng, 0)?;
            (BoxData::Meta, read_children(rng, limits, depth)?)
        }
        FourCC::HDLR => (BoxData::Hdlr(HdlrBox::parse(rng, header)?), no_children),
        FourCC::PITM => (BoxData::Pitm(PitmBox::parse(rng, header)?), no_children),
        FourCC::ILOC => (
            BoxData::Iloc(IlocBox::parse(rng, header, limits)?),
            no_children,
        ),
        FourCC::IINF => {
            header.read_full_checked(rng, 1)?;
            let count = if header.version() > 0 {
                rng.read_u32()
            } else {
                rng.read_u16() as u32
            };
            let children = read_children_counted(rng, limits, depth, count)?;
            (BoxData::Iinf, children)
        }
        FourCC::INFE => (BoxData::Infe(InfeBox::parse(rng, header)?), no_children),
        FourCC::IREF => (BoxData::Iref(IrefBox::parse(rng, header)?), no_children),
        FourCC::IPRP => (BoxData::Iprp, read_children(rng, limits, depth)?),
        FourCC::IPCO => (BoxData::Ipco, read_children(rng, limits, depth)?),
        FourCC::IPMA => (BoxData::Ipma(IpmaBox::parse(rng, header)?), no_children),
        FourCC::IDAT => (BoxData::Idat(IdatBox::parse(rng)?), no_children),
        FourCC::GRPL => (BoxData::Grpl(GrplBox::parse(rng)?), no_children),
        FourCC::DINF => (BoxData::Dinf, read_children(rng, limits, depth)?),
        FourCC::DREF => {
            header.read_full_checked(rng, 0)?;
            let count = rng.read_u32();
            let children = read_children_counted(rng, limits, depth, count)?;
            (BoxData::Dref, children)
        }
        FourCC::URL => (BoxData::Url(UrlBox::parse(rng, header)?), no_children),
        FourCC::ISPE => (BoxData::Ispe(IspeBox::parse(rng, header)?), no_children),
        FourCC::COLR => (BoxData::Colr(ColrBox::parse(rng, limits)?), no_children),
        FourCC::PIXI => (BoxData::Pixi(PixiBox::parse(rng, header)?), no_children),
        FourCC::PASP => (BoxData::Pasp(PaspBox::parse(rng)?), no_children),
        FourCC::CLLI => (BoxData::Clli(ClliBox::parse(rng)?), no_children),
        FourCC::MDCV => (BoxData::Mdcv(MdcvBox::parse(rng)?), no_children),
        FourCC::AUXC => (BoxData::AuxC(AuxCBox::parse(rng, header)?), no_children),
        FourCC::IROT => (BoxData::Irot(IrotBox::parse(rng)?), no_children),
        FourCC::IMIR => (BoxData::Imir(ImirBox::parse(rng)?), no_children),
        FourCC::CLAP => (BoxData::Clap(ClapBox::parse(rng)?), no_children),
        FourCC::CMPD => (BoxData::Cmpd(CmpdBox::parse(rng)?), no_children),
        FourCC::UNCC => (BoxData::UncC(UncCBox::parse(rng, header)?), no_children),
        FourCC::HVCC => (BoxData::HvcC(HvcCBox::parse(rng, limits)?), no_children),
        FourCC::AV1C => (BoxData::Av1C(Av1CBox::parse(rng, limits)?), no_children),
        FourCC::VVCC => (
            BoxData::VvcC(VvcCBox::parse(rng, header, limits)?),
            no_children,
        ),
        FourCC::J2KH => (BoxData::J2kH, read_children(rng, limits, depth)?),
        FourCC::MOOV => (BoxData::Moov, read_children(rng, limits, depth)?),
        FourCC::MVHD => (BoxData::Mvhd(MvhdBox::parse(rng, header)?), no_children),
        FourCC::TRAK => (BoxData::Trak, read_children(rng, limits, depth)?),
        FourCC::TKHD => (BoxData::Tkhd(TkhdBox::parse(rng, header)?), no_children),
        FourCC::TREF => (BoxData::Tref(TrefBox::parse(rng)?), no_children),
        FourCC::MDIA => (BoxData::Mdia, read_children(rng, limits, depth)?),
        FourCC::MDHD => (BoxData::Mdhd(MdhdBox::parse(rng, header)?), no_children),
        FourCC::MINF => (BoxData::Minf, read_children(rng, limits, depth)?),
        FourCC::VMHD => (BoxData::Vmhd(VmhdBox::parse(rng, header)?), no_children),
        FourCC::NMHD => {
            header.read_full_checked(rng, 0)?;
            (BoxData::Nmhd, no_children)
        }
        FourCC::STBL => (BoxData::Stbl, read_children(rng, limits, depth)?),
        FourCC::STSD => {
            let count = StsdBox::parse(rng, header)?;
            let children = read_children_counted(rng, limits, depth, count)?;
            (BoxData::Stsd(StsdBox), children)
        }
        FourCC::HVC1 | FourCC::HEV1 | FourCC::AV01 | FourCC::VVC1 | FourCC::J2KI
        | FourCC::UNCI | FourCC::JPEG => {
            let entry = VisualSampleEntryBox::parse(rng)?;
            let children = read_children(rng, limits, depth)?;
            (BoxData::VisualSampleEntry(entry), children)
        }
        FourCC::URIM => {
            let entry = UrimBox::parse(rng)?;
            let children = read_children(rng, limits, depth)?;
            (BoxData::Urim(entry), children)
        }
        FourCC::URI => (BoxData::Uri(UriBox::parse(rng, header)?), no_children),
        FourCC::STTS => (BoxData::Stts(SttsBox::parse(rng, header)?), no_children),
        FourCC::STSC => (BoxData::Stsc(StscBox::parse(rng, header)?), no_children),
        FourCC::STCO => (
            BoxData::Stco(StcoBox::parse(rng, header, false)?),
            no_children,
        ),
        FourCC::CO64 => (
            BoxData::Stco(StcoBox::parse(rng, header, true)?),
            no_children,
        ),
        FourCC::STSS => (BoxData::Stss(StssBox::parse(rng, header)?), no_children),
        FourCC::STSZ => (BoxData::Stsz(StszBox::parse(rng, header)?), no_children),
        FourCC::SAIZ => (BoxData::Saiz(SaizBox::parse(rng, header)?), no_children),
        FourCC::SAIO => (BoxData::Saio(SaioBox::parse(rng, header)?), no_children),
        FourCC::TAIC => (BoxData::Taic(TaicBox::parse(rng, header)?), no_children),
        FourCC::ITAI => (BoxData::Itai(ItaiBox::parse(rng, header)?), no_children),
        FourCC::MDAT => (BoxData::Mdat(MdatBox::parse(rng)?), no_children),
        other => {
            let len = rng.remaining();
            if len > limits.max_memory_block_size {
                return Err(Error::limit(format!(
                    "opaque '{other}' box of {len} bytes exceeds the memory limit"
                )));
            }
            tracing::debug!(box_type = %other, len, "Preserving unknown box opaquely");
            let payload = rng.read_bytes(len as usize);
            (BoxData::Unknown(UnknownBox { payload }), no_children)
        }
    })
}

/// Reads child boxes until the range is exhausted.
pub fn read_children(
    range: &mut BitstreamRange<'_>,
    limits: &SecurityLimits,
    depth: u32,
) -> Result<Vec<HeifBox>> {
    read_children_counted(range, limits, depth, u32::MAX)
}

fn read_children_counted(
    range: &mut BitstreamRange<'_>,
    limits: &SecurityLimits,
    depth: u32,
    max_count: u32,
) -> Result<Vec<HeifBox>> {
    let mut children = Vec::new();
    while !range.eof() && !range.error() && (children.len() as u32) < max_count {
        let child = read_box(range, limits, depth + 1)?;
        if children.len() as u32 >= limits.max_children_per_box {
            return Err(Error::limit("maximum number of child boxes exceeded"));
        }
        children.push(child);
    }
    Ok(children)
}

impl HeifBox {
    /// Recursively fixes up FullBox versions and flags from the payload contents, mirroring the
    /// on-write version derivation of the original format (wide item ids, construction methods,
    /// 64-bit times and offsets all bump versions).
    pub fn derive_versions(&mut self) {
        match &self.data {
            BoxData::Pitm(b) => {
                let flags = self.header.flags();
                self.header.set_version_flags(b.derived_version(), flags);
            }
            BoxData::Iloc(b) => {
                self.header.set_version_flags(b.derived_version(), 0);
            }
            BoxData::Iinf => {
                let version = u8::from(self.children.len() > 0xffff);
                self.header.set_version_flags(version, 0);
            }
            BoxData::Infe(b) => {
                let (version, flags) = b.derived_version();
                self.header.set_version_flags(version, flags);
            }
            BoxData::Iref(b) => {
                self.header.set_version_flags(b.derived_version(), 0);
            }
            BoxData::Ipma(b) => {
                let (version, flags) = b.derived_version();
                self.header.set_version_flags(version, flags);
            }
            BoxData::Mvhd(b) => {
                let flags = self.header.flags();
                self.header.set_version_flags(b.derived_version(), flags);
            }
            BoxData::Tkhd(b) => {
                let flags = self.header.flags();
                self.header.set_version_flags(b.derived_version(), flags);
            }
            BoxData::Mdhd(b) => {
                let flags = self.header.flags();
                self.header.set_version_flags(b.derived_version(), flags);
            }
            BoxData::Saiz(b) => {
                self.header.set_version_flags(0, b.derived_flags());
            }
            BoxData::Saio(b) => {
                let (version, flags) = b.derived_version_flags();
                self.header.set_version_flags(version, flags);
            }
            BoxData::Url(b) => {
                self.header
                    .set_version_flags(0, u32::from(b.self_contained));
            }
            _ => {}
        }

        for child in &mut self.children {
            child.derive_versions();
        }
    }

    /// Serializes this box and its children, reserving and back-patching the header.
    ///
    /// Table positions that need patching after `mdat` layout are recorded in `patches` in
    /// document order.
    pub fn write(&self, w: &mut StreamWriter, patches: &mut PatchPositions) -> Result<()> {
        let box_start = self.header.reserve(w);
        self.write_payload(w, patches)?;
        for child in &self.children {
            child.write(w, patches)?;
        }
        self.header.prepend(w, box_start);
        Ok(())
    }

    fn write_payload(&self, w: &mut StreamWriter, patches: &mut PatchPositions) -> Result<()> {
        match &self.data {
            BoxData::Ftyp(b) => b.write(w),
            BoxData::Meta
            | BoxData::Iprp
            | BoxData::Ipco
            | BoxData::Dinf
            | BoxData::J2kH
            | BoxData::Moov
            | BoxData::Trak
            | BoxData::Mdia
            | BoxData::Minf
            | BoxData::Nmhd
            | BoxData::Stbl => {}
            BoxData::Hdlr(b) => b.write(w),
            BoxData::Pitm(b) => b.write(w, self.header.version()),
            BoxData::Iloc(b) => {
                patches.iloc_tables.push(w.position());
                b.write_table(w, self.header.version());
            }
            BoxData::Iinf => {
                if self.header.version() > 0 {
                    w.write_u32(self.children.len() as u32);
                } else {
                    w.write_u16(self.children.len() as u16);
                }
            }
            BoxData::Infe(b) => b.write(w, self.header.version()),
            BoxData::Iref(b) => b.write(w, self.header.version()),
            BoxData::Ipma(b) => b.write(w, self.header.version(), self.header.flags()),
            BoxData::Idat(_) => {
                // Writer-side items always use file extents; nothing to serialize.
            }
            BoxData::Grpl(b) => b.write(w),
            BoxData::Dref => w.write_u32(self.children.len() as u32),
            BoxData::Url(b) => b.write(w),
            BoxData::Ispe(b) => b.write(w),
            BoxData::Colr(b) => b.write(w),
            BoxData::Pixi(b) => b.write(w),
            BoxData::Pasp(b) => b.write(w),
            BoxData::Clli(b) => b.write(w),
            BoxData::Mdcv(b) => b.write(w),
            BoxData::AuxC(b) => b.write(w),
            BoxData::Irot(b) => b.write(w),
            BoxData::Imir(b) => b.write(w),
            BoxData::Clap(b) => b.write(w),
            BoxData::Cmpd(b) => b.write(w),
            BoxData::UncC(b) => b.write(w),
            BoxData::HvcC(b) => b.write(w),
            BoxData::Av1C(b) => b.write(w),
            BoxData::VvcC(b) => b.write(w),
            BoxData::Mvhd(b) => b.write(w, self.header.version()),
            BoxData::Tkhd(b) => b.write(w, self.header.version()),
            BoxData::Tref(b) => b.write(w),
            BoxData::Mdhd(b) => b.write(w, self.header.version()),
            BoxData::Vmhd(b) => b.write(w),
            BoxData::Stsd(_) => w.write_u32(self.children.len() as u32),
            BoxData::VisualSampleEntry(b) => b.write(w),
            BoxData::Urim(b) => b.write(w),
            BoxData::Uri(b) => b.write(w),
            BoxData::Stts(b) => b.write(w),
            BoxData::Stsc(b) => b.write(w),
            BoxData::Stco(b) => {
                patches.stco_tables.push(w.position());
                b.write_table(w);
            }
            BoxData::Stss(b) => b.write(w),
            BoxData::Stsz(b) => b.write(w),
            BoxData::Saiz(b) => b.write(w),
            BoxData::Saio(b) => {
                patches.saio_tables.push(w.position());
                b.write_table(w);
            }
            BoxData::Taic(b) => b.write(w),
            BoxData::Itai(b) => b.write(w),
            BoxData::Mdat(_) => {
                return Err(Error::usage(
                    "mdat is laid out by the file writer, not the box tree",
                ));
            }
            BoxData::Unknown(b) => w.write_bytes(&b.payload),
        }
        Ok(())
    }
}

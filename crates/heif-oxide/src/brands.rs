//! Brand handling: the read-side compatibility gate and the write-side brand derivation.

use heif_bmff::boxes::FtypBox;
use heif_bmff::FourCC;

use crate::codecs::CompressionFormat;
use crate::file::HeifFile;

/// Brands the library understands on the read side.
pub const READ_BRANDS: &[FourCC] = &[
    FourCC::HEIC,
    FourCC::HEIX,
    FourCC::MIF1,
    FourCC::MSF1,
    FourCC::AVIF,
    FourCC::AVIS,
    FourCC::ISO8,
    FourCC::ONE_PIC,
    FourCC::UNIF,
    FourCC::J2KI,
    FourCC::J2IS,
];

pub fn supported_for_reading(ftyp: &FtypBox) -> bool {
    READ_BRANDS.iter().any(|&brand| ftyp.has_brand(brand))
}

/// Checks whether the `meta` structure satisfies the `mif1` constraints of
/// ISO/IEC 23008-12 clause 10.2: all the structural boxes at versions that brand permits.
fn check_mif1(file: &HeifFile) -> bool {
    let Ok(meta) = file.meta() else {
        return false;
    };
    if meta.header.version() != 0 {
        return false;
    }

    let Some(hdlr) = meta.child(FourCC::HDLR) else {
        return false;
    };
    if hdlr.header.version() != 0 {
        return false;
    }

    let Some(iloc) = meta.child(FourCC::ILOC) else {
        return false;
    };
    if iloc.header.version() > 2 {
        return false;
    }

    let Some(iinf) = meta.child(FourCC::IINF) else {
        return false;
    };
    if iinf.header.version() > 1 {
        return false;
    }
    let mut infes = iinf.children_of(FourCC::INFE).peekable();
    if infes.peek().is_none() {
        return false;
    }
    if !infes.all(|infe| (2..=3).contains(&infe.header.version())) {
        return false;
    }

    let Some(pitm) = meta.child(FourCC::PITM) else {
        return false;
    };
    if pitm.header.version() > 1 {
        return false;
    }

    meta.child(FourCC::IPRP).is_some()
}

/// Derives the major brand and compatible-brand list for writing.
///
/// The major brand follows the primary payload's codec; a sequence track adds the sequence
/// brand of that codec family.
pub fn compute_write_brands(file: &HeifFile) -> (FourCC, Vec<FourCC>) {
    let primary_format = primary_item_format(file);
    let has_sequence = file
        .moov()
        .map(|moov| moov.child(FourCC::TRAK).is_some())
        .unwrap_or(false);
    let has_items = !file.infe_items().map(|v| v.is_empty()).unwrap_or(true);

    let major = match primary_format {
        Some(CompressionFormat::Hevc) => FourCC::HEIC,
        Some(CompressionFormat::Av1) => FourCC::AVIF,
        Some(CompressionFormat::Jpeg2000) => FourCC::J2KI,
        _ if has_items => FourCC::MIF1,
        _ if has_sequence => FourCC::MSF1,
        _ => FourCC::MIF1,
    };

    let mut compatibles = vec![major];
    if check_mif1(file) {
        push_unique(&mut compatibles, FourCC::MIF1);
    }
    if has_sequence {
        push_unique(&mut compatibles, FourCC::MSF1);
        if primary_format == Some(CompressionFormat::Av1) {
            push_unique(&mut compatibles, FourCC::AVIS);
        }
        push_unique(&mut compatibles, FourCC::ISO8);
    }

    (major, compatibles)
}

fn push_unique(brands: &mut Vec<FourCC>, brand: FourCC) {
    if !brands.contains(&brand) {
        brands.push(brand);
    }
}

fn primary_item_format(file: &HeifFile) -> Option<CompressionFormat> {
    let primary = file.primary_item_id().ok()?;
    let items = file.infe_items().ok()?;
    let infe = items.iter().find(|i| i.item_id == primary)?;
    CompressionFormat::from_item_type(infe.item_type?)
}

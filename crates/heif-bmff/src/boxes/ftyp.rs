use heif_bitstream::{BitstreamRange, StreamWriter};

use crate::error::Result;
use crate::fourcc::FourCC;

/// File type box (`ftyp`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FtypBox {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl FtypBox {
    pub fn parse(range: &mut BitstreamRange<'_>) -> Result<Self> {
        let major_brand = FourCC(range.read_fixed::<4>());
        let minor_version = range.read_u32();
        let mut compatible_brands = Vec::new();
        while range.remaining() >= 4 {
            compatible_brands.push(FourCC(range.read_fixed::<4>()));
        }
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }

    pub fn write(&self, w: &mut StreamWriter) {
        w.write_bytes(&self.major_brand.0);
        w.write_u32(self.minor_version);
        for brand in &self.compatible_brands {
            w.write_bytes(&brand.0);
        }
    }

    /// A brand is present iff it is the major brand or listed as compatible.
    pub fn has_brand(&self, brand: FourCC) -> bool {
        self.major_brand == brand || self.compatible_brands.contains(&brand)
    }

    pub fn add_compatible_brand(&mut self, brand: FourCC) {
        if !self.has_brand(brand) {
            self.compatible_brands.push(brand);
        }
    }
}

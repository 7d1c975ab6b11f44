/// Four-character code identifying box types, brands, item types and handlers.
///
/// Known codes are defined as associated consts.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    // Top-level and meta structure.
    pub const FTYP: Self = Self(*b"ftyp");
    pub const META: Self = Self(*b"meta");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const PITM: Self = Self(*b"pitm");
    pub const ILOC: Self = Self(*b"iloc");
    pub const IINF: Self = Self(*b"iinf");
    pub const INFE: Self = Self(*b"infe");
    pub const IREF: Self = Self(*b"iref");
    pub const IPRP: Self = Self(*b"iprp");
    pub const IPCO: Self = Self(*b"ipco");
    pub const IPMA: Self = Self(*b"ipma");
    pub const IDAT: Self = Self(*b"idat");
    pub const GRPL: Self = Self(*b"grpl");
    pub const DINF: Self = Self(*b"dinf");
    pub const DREF: Self = Self(*b"dref");
    pub const URL: Self = Self(*b"url ");
    pub const MDAT: Self = Self(*b"mdat");
    pub const FREE: Self = Self(*b"free");
    pub const UUID: Self = Self(*b"uuid");

    // Item properties.
    pub const ISPE: Self = Self(*b"ispe");
    pub const COLR: Self = Self(*b"colr");
    pub const PIXI: Self = Self(*b"pixi");
    pub const PASP: Self = Self(*b"pasp");
    pub const CLLI: Self = Self(*b"clli");
    pub const MDCV: Self = Self(*b"mdcv");
    pub const AUXC: Self = Self(*b"auxC");
    pub const IROT: Self = Self(*b"irot");
    pub const IMIR: Self = Self(*b"imir");
    pub const CLAP: Self = Self(*b"clap");
    pub const CMPD: Self = Self(*b"cmpd");
    pub const UNCC: Self = Self(*b"uncC");

    // Codec configuration properties.
    pub const HVCC: Self = Self(*b"hvcC");
    pub const AV1C: Self = Self(*b"av1C");
    pub const VVCC: Self = Self(*b"vvcC");
    pub const J2KH: Self = Self(*b"j2kH");

    // Movie / track structure.
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const TREF: Self = Self(*b"tref");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const MINF: Self = Self(*b"minf");
    pub const VMHD: Self = Self(*b"vmhd");
    pub const NMHD: Self = Self(*b"nmhd");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const STSC: Self = Self(*b"stsc");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const STTS: Self = Self(*b"stts");
    pub const STSS: Self = Self(*b"stss");
    pub const STSZ: Self = Self(*b"stsz");
    pub const SAIZ: Self = Self(*b"saiz");
    pub const SAIO: Self = Self(*b"saio");
    pub const TAIC: Self = Self(*b"taic");
    pub const ITAI: Self = Self(*b"itai");

    // Sample entries.
    pub const HVC1: Self = Self(*b"hvc1");
    pub const HEV1: Self = Self(*b"hev1");
    pub const AV01: Self = Self(*b"av01");
    pub const VVC1: Self = Self(*b"vvc1");
    pub const J2KI: Self = Self(*b"j2ki");
    pub const UNCI: Self = Self(*b"unci");
    pub const URIM: Self = Self(*b"urim");
    pub const URI: Self = Self(*b"uri ");

    // Item types that are not box types.
    pub const JPEG: Self = Self(*b"jpeg");
    pub const J2K1: Self = Self(*b"j2k1");
    pub const GRID: Self = Self(*b"grid");
    pub const IDEN: Self = Self(*b"iden");
    pub const IOVL: Self = Self(*b"iovl");
    pub const MSKI: Self = Self(*b"mski");
    pub const EXIF: Self = Self(*b"Exif");
    pub const MIME: Self = Self(*b"mime");
    pub const RGAN: Self = Self(*b"rgan");

    // Handlers.
    pub const PICT: Self = Self(*b"pict");
    pub const VIDE: Self = Self(*b"vide");

    // Item / track reference types.
    pub const THMB: Self = Self(*b"thmb");
    pub const AUXL: Self = Self(*b"auxl");
    pub const CDSC: Self = Self(*b"cdsc");
    pub const PREM: Self = Self(*b"prem");
    pub const DIMG: Self = Self(*b"dimg");
    pub const MASK: Self = Self(*b"mask");

    // Sample auxiliary information types.
    pub const STAI: Self = Self(*b"stai");
    pub const SUID: Self = Self(*b"suid");

    // Color profile kinds inside `colr`.
    pub const NCLX: Self = Self(*b"nclx");
    pub const RICC: Self = Self(*b"rICC");
    pub const PROF: Self = Self(*b"prof");

    // Brands.
    pub const HEIC: Self = Self(*b"heic");
    pub const HEIX: Self = Self(*b"heix");
    pub const MIF1: Self = Self(*b"mif1");
    pub const MSF1: Self = Self(*b"msf1");
    pub const AVIF: Self = Self(*b"avif");
    pub const AVIS: Self = Self(*b"avis");
    pub const ISO8: Self = Self(*b"iso8");
    pub const ONE_PIC: Self = Self(*b"1pic");
    pub const UNIF: Self = Self(*b"unif");
    pub const J2IS: Self = Self(*b"j2is");

    pub const fn from_u32(v: u32) -> Self {
        Self(v.to_be_bytes())
    }

    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => write!(
                f,
                "0x{:02x}{:02x}{:02x}{:02x}",
                self.0[0], self.0[1], self.0[2], self.0[3]
            ),
        }
    }
}

impl std::fmt::Debug for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FourCC({self})")
    }
}

impl Default for FourCC {
    fn default() -> Self {
        Self([0; 4])
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(v: [u8; 4]) -> Self {
        Self(v)
    }
}

impl From<u32> for FourCC {
    fn from(v: u32) -> Self {
        Self::from_u32(v)
    }
}

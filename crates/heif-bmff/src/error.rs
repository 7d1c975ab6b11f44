use std::borrow::Cow;

use crate::fourcc::FourCC;

/// Broad error category, the first half of the error pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidInput,
    Unsupported,
    UsageError,
    MemoryAllocation,
    DecoderPlugin,
    EncoderPlugin,
    ColorProfile,
    /// Sentinel raised by sequence iteration; not a fault.
    EndOfSequence,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidInput => "invalid input",
            Self::Unsupported => "unsupported feature",
            Self::UsageError => "usage error",
            Self::MemoryAllocation => "memory allocation error",
            Self::DecoderPlugin => "decoder plugin error",
            Self::EncoderPlugin => "encoder plugin error",
            Self::ColorProfile => "color profile error",
            Self::EndOfSequence => "end of sequence",
        };
        f.write_str(s)
    }
}

/// Concrete failure site, the second half of the error pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Suberror {
    Unspecified,
    EndOfData,
    ParseError,
    InvalidBoxSize,
    TooDeeplyNested,
    SecurityLimitExceeded,
    NoCompatibleBrand,
    MissingBox(FourCC),
    NoPictHandler,
    NonexistentItemReferenced,
    NonexistentPropertyReferenced,
    ReferenceCycle,
    MissingGridTiles,
    InvalidGridData,
    InvalidOverlayData,
    InvalidCleanAperture,
    PixiMismatch,
    IncompatibleTileChroma,
    UnsupportedImageType,
    UnsupportedCodec,
    UnsupportedDataVersion,
    UnsupportedBitDepth,
    NoItemData,
    InvalidProperty,
    InvalidPixelFormat,
    EndOfSequence,
}

impl std::fmt::Display for Suberror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::EndOfData => write!(f, "unexpected end of data"),
            Self::ParseError => write!(f, "parse error"),
            Self::InvalidBoxSize => write!(f, "invalid box size"),
            Self::TooDeeplyNested => write!(f, "boxes nested too deeply"),
            Self::SecurityLimitExceeded => write!(f, "security limit exceeded"),
            Self::NoCompatibleBrand => write!(f, "no compatible brand"),
            Self::MissingBox(fourcc) => write!(f, "required box '{fourcc}' missing"),
            Self::NoPictHandler => write!(f, "handler is not 'pict'"),
            Self::NonexistentItemReferenced => write!(f, "nonexistent item referenced"),
            Self::NonexistentPropertyReferenced => write!(f, "nonexistent property referenced"),
            Self::ReferenceCycle => write!(f, "cycle in item references"),
            Self::MissingGridTiles => write!(f, "missing grid tile images"),
            Self::InvalidGridData => write!(f, "invalid grid data"),
            Self::InvalidOverlayData => write!(f, "invalid overlay data"),
            Self::InvalidCleanAperture => write!(f, "invalid clean aperture"),
            Self::PixiMismatch => write!(f, "pixi bit depth disagrees with image"),
            Self::IncompatibleTileChroma => write!(f, "tiles use incompatible chroma formats"),
            Self::UnsupportedImageType => write!(f, "unsupported image type"),
            Self::UnsupportedCodec => write!(f, "unsupported codec"),
            Self::UnsupportedDataVersion => write!(f, "unsupported data version"),
            Self::UnsupportedBitDepth => write!(f, "unsupported bit depth"),
            Self::NoItemData => write!(f, "item has no data"),
            Self::InvalidProperty => write!(f, "invalid property"),
            Self::InvalidPixelFormat => write!(f, "invalid pixel format"),
            Self::EndOfSequence => write!(f, "end of sequence"),
        }
    }
}

/// Library error: a broad kind, a concrete sub-kind and a human-readable message.
///
/// Parsing never panics; every fallible operation returns this type. Container parsers
/// propagate child errors unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub suberror: Suberror,
    pub message: Cow<'static, str>,
}

impl Error {
    pub fn new(
        kind: ErrorKind,
        suberror: Suberror,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            suberror,
            message: message.into(),
        }
    }

    pub fn invalid_input(suberror: Suberror, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidInput, suberror, message)
    }

    pub fn unsupported(suberror: Suberror, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Unsupported, suberror, message)
    }

    pub fn usage(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::UsageError, Suberror::Unspecified, message)
    }

    pub fn limit(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            ErrorKind::MemoryAllocation,
            Suberror::SecurityLimitExceeded,
            message,
        )
    }

    pub fn parse(message: impl Into<Cow<'static, str>>) -> Self {
        Self::invalid_input(Suberror::ParseError, message)
    }

    pub fn truncated(message: impl Into<Cow<'static, str>>) -> Self {
        Self::invalid_input(Suberror::EndOfData, message)
    }

    pub fn missing_box(fourcc: FourCC) -> Self {
        Self::invalid_input(Suberror::MissingBox(fourcc), "required box missing")
    }

    pub fn end_of_sequence() -> Self {
        Self::new(
            ErrorKind::EndOfSequence,
            Suberror::EndOfSequence,
            "end of sequence",
        )
    }

    pub fn is_end_of_sequence(&self) -> bool {
        self.kind == ErrorKind::EndOfSequence
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.suberror)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<heif_image::Error> for Error {
    fn from(err: heif_image::Error) -> Self {
        let (kind, suberror) = match &err {
            heif_image::Error::InvalidCrop => {
                (ErrorKind::InvalidInput, Suberror::InvalidCleanAperture)
            }
            heif_image::Error::NonvisualData => {
                (ErrorKind::UsageError, Suberror::InvalidPixelFormat)
            }
            heif_image::Error::AllocationTooLarge { .. } => (
                ErrorKind::MemoryAllocation,
                Suberror::SecurityLimitExceeded,
            ),
            _ => (ErrorKind::UsageError, Suberror::Unspecified),
        };
        Self::new(kind, suberror, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

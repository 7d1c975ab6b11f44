#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The requested channel does not exist in this image.
    MissingChannel,
    /// A plane with mismatched geometry or depth was supplied.
    PlaneMismatch(&'static str),
    /// The crop window is empty, inverted, or outside the image.
    InvalidCrop,
    /// The rotation angle is not a multiple of 90 degrees.
    InvalidRotation(u32),
    /// The operation is not defined for nonvisual sample data.
    NonvisualData,
    /// The images involved in a compositing operation disagree in format.
    IncompatibleFormats(&'static str),
    /// A plane allocation would exceed the configured memory limit.
    AllocationTooLarge { requested: u64, limit: u64 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingChannel => write!(f, "image does not contain the requested channel"),
            Self::PlaneMismatch(what) => write!(f, "plane mismatch: {what}"),
            Self::InvalidCrop => write!(f, "invalid crop window"),
            Self::InvalidRotation(angle) => {
                write!(f, "rotation angle {angle} is not a multiple of 90 degrees")
            }
            Self::NonvisualData => {
                write!(f, "operation is not defined for nonvisual sample data")
            }
            Self::IncompatibleFormats(what) => write!(f, "incompatible image formats: {what}"),
            Self::AllocationTooLarge { requested, limit } => {
                write!(
                    f,
                    "plane allocation of {requested} bytes exceeds the limit of {limit} bytes"
                )
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

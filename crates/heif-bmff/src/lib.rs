//! This crate provides the ISOBMFF box layer of heif-oxide: parsing a byte stream into a typed
//! box tree, and serializing the tree back with correctly back-patched headers and offset
//! tables.
//!
//! # Reading
//!
//! [`boxes::read_box`] reads one box from a [`BitstreamRange`](heif_bitstream::BitstreamRange),
//! dispatching on the four-character code. Container boxes parse their children from a bounded
//! sub-range; unknown boxes are preserved opaquely. Nesting depth, child counts, table sizes
//! and memory blocks are all bounded by [`SecurityLimits`].
//!
//! # Writing
//!
//! Each box reserves header space, writes its payload and children, then back-patches the
//! header with the computed size, promoting to a 64-bit size field when needed. The `iloc`,
//! `stco`/`co64` and `saio` tables additionally record their positions in
//! [`boxes::PatchPositions`] so the file writer can rewrite them once `mdat` has been laid
//! down.
//!
//! # Errors
//!
//! Every fallible operation returns the library-wide [`Error`] pair of broad kind and concrete
//! sub-kind. Parsing never panics.

mod error;
mod fourcc;
mod header;
mod limits;

pub mod boxes;

pub use error::{Error, ErrorKind, Result, Suberror};
pub use fourcc::FourCC;
pub use header::{BoxHeader, FullBoxHeader};
pub use limits::SecurityLimits;

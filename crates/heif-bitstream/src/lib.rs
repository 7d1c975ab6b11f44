//! This crate provides the low-level I/O primitives used by the heif-oxide box layer.
//!
//! # Byte ranges
//!
//! [`BitstreamRange`] is a bounded, big-endian byte reader over a [`ByteSource`]. Ranges can be
//! nested with [`BitstreamRange::sub_range`]; reads are propagated to the enclosing ranges so
//! that a parent always knows how many of its bytes have been consumed. An over-read does not
//! return an error directly. Instead it marks the range (and its ancestors) as exhausted,
//! returns a zero value, and short-circuits all subsequent reads; callers inspect
//! [`BitstreamRange::error`] once after a parse step.
//!
//! # Bit reader
//!
//! [`BitReader`] reads bit-granular data from an in-memory buffer, including the Exp-Golomb
//! codes used by video parameter sets.
//!
//! # Writer
//!
//! [`StreamWriter`] is a position-addressable byte vector used to serialize box trees. It
//! supports writing past data for header back-patching and opening gaps with
//! [`StreamWriter::insert`].

mod bitreader;
mod range;
mod writer;

pub use bitreader::{BitReader, BitReaderError};
pub use range::{BitstreamRange, ByteSource, FileSource, MemorySource, RangeSource, SourceCursor};
pub use writer::StreamWriter;

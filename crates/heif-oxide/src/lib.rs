//! heif-oxide reads and writes still images and short image sequences packaged in the
//! ISOBMFF/HEIF container family (HEIC, AVIF and friends). It is organized into a few small
//! crates; this crate acts as a blanket and provides the [`HeifContext`] API on top of them.
//!
//! The library mediates between the raw byte stream and decoded pixels, but contains no codec
//! itself: compression and decompression are performed by plugins registered on the context.
//!
//! # Reading a still image
//!
//! ```no_run
//! # fn main() -> heif_oxide::Result<()> {
//! # fn hevc_plugin() -> std::sync::Arc<dyn heif_oxide::DecoderPlugin> { unimplemented!() }
//! let mut ctx = heif_oxide::HeifContext::builder()
//!     .register_decoder(hevc_plugin())
//!     .build();
//! ctx.read_from_bytes(std::fs::read("input.heic").expect("failed to read file"))?;
//! let image = ctx.decode_primary_image()?;
//! println!("{}x{}", image.width(), image.height());
//! # Ok(())
//! # }
//! ```
//!
//! # Writing
//!
//! Images are added through an encoder plugin ([`HeifContext::add_image`]); grids, overlays,
//! thumbnails, auxiliary images and metadata attach to them. Sequences use
//! [`HeifContext::add_visual_sequence_track`] and friends. [`HeifContext::write_to_vec`] lays
//! out `ftyp` + `meta` (+ `moov`) + `mdat` and back-patches all offset tables.

mod brands;
mod codecs;
mod context;
mod decode;
mod file;
mod item;
mod track;

pub use heif_bitstream::{ByteSource, FileSource, MemorySource};
pub use heif_bmff::{
    boxes, BoxHeader, Error, ErrorKind, FourCC, FullBoxHeader, Result, SecurityLimits, Suberror,
};
pub use heif_image::{
    Channel, Chroma, ColorProfile, Colorspace, ContentLightLevel, MasteringDisplayColourVolume,
    MirrorAxis, NclxColorProfile, PixelAspectRatio, PixelImage, Plane, SampleDataType,
    TaiClockInfo, TaiTimestamp,
};
pub use heif_threadpool::DecodePool;

pub use brands::READ_BRANDS;
pub use codecs::{
    CompressionFormat, DecoderPlugin, EncoderPlugin, ImageDecoder, ImageEncoder, PluginRegistry,
};
pub use context::{HeifContext, HeifContextBuilder};
pub use file::HeifFile;
pub use item::derived::{ImageGrid, ImageOverlay};
pub use item::{AuxRole, ImageItem, ItemModel};
pub use track::{
    RawSequenceSample, SampleAuxPresence, Track, TrackOptions, GIMI_TRACK_CONTENT_ID_URI,
};

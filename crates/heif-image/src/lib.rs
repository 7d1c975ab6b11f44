//! This crate provides [`PixelImage`], the typed multi-channel planar image buffer that the
//! heif-oxide box layer hands to codec plugins and receives back from them. It also defines the
//! descriptive side-data types (color profiles, light levels, pixel aspect ratio, TAI
//! timestamps) that travel with an image through the container.
//!
//! The buffer itself is codec-agnostic: it knows about channels, per-plane dimensions, bit
//! depths and strides, and offers the geometry operations needed for the HEIF transform
//! properties (rotate, mirror, crop) and derived images (fill, overlay, scale). It does not do
//! colorspace conversion.

mod error;
mod image;
mod side_data;

pub use error::{Error, Result};
pub use image::{Channel, Chroma, Colorspace, MirrorAxis, PixelImage, Plane, SampleDataType};
pub use side_data::{
    ColorProfile, ContentLightLevel, MasteringDisplayColourVolume, NclxColorProfile,
    PixelAspectRatio, TaiClockInfo, TaiTimestamp,
};

//! Decode path for ISO/IEC 23001-17 uncompressed (`unci`) and mask (`mski`) items.
//!
//! Only the common v0 subset is decodable: 8-bit components, no blocks, no custom alignment,
//! planar or pixel-interleaved layout, no subsampling, single tile. Everything else parses at
//! the box layer and fails here with `Unsupported`.

use heif_bmff::boxes::{component_type, CmpdBox, UncCBox};
use heif_bmff::{Error, Result, Suberror};
use heif_image::{Channel, Chroma, Colorspace, PixelImage};

const INTERLEAVE_COMPONENT: u8 = 0;
const INTERLEAVE_PIXEL: u8 = 1;

fn channel_for(component: u16) -> Option<Channel> {
    match component {
        component_type::MONOCHROME | component_type::Y => Some(Channel::Y),
        component_type::CB => Some(Channel::Cb),
        component_type::CR => Some(Channel::Cr),
        component_type::RED => Some(Channel::R),
        component_type::GREEN => Some(Channel::G),
        component_type::BLUE => Some(Channel::B),
        component_type::ALPHA => Some(Channel::Alpha),
        _ => None,
    }
}

fn unsupported(what: impl Into<String>) -> Error {
    Error::unsupported(Suberror::UnsupportedDataVersion, what.into())
}

/// Checks the configuration against the decodable subset.
fn check_supported(cmpd: &CmpdBox, uncc: &UncCBox) -> Result<()> {
    if uncc.version != 0 {
        return Err(unsupported("profile-only uncC is not decodable yet"));
    }
    if uncc.num_tile_cols_minus_one != 0 || uncc.num_tile_rows_minus_one != 0 {
        return Err(unsupported("uncompressed tile grids are not decodable yet"));
    }
    if uncc.sampling_type != 0 {
        return Err(unsupported(format!(
            "uncompressed sampling_type {} is not supported",
            uncc.sampling_type
        )));
    }
    if uncc.interleave_type != INTERLEAVE_COMPONENT && uncc.interleave_type != INTERLEAVE_PIXEL {
        return Err(unsupported(format!(
            "uncompressed interleave_type {} is not supported",
            uncc.interleave_type
        )));
    }
    if uncc.block_size != 0 || uncc.block_pad_lsb || uncc.block_little_endian || uncc.block_reversed
    {
        return Err(unsupported("uncompressed block modes are not supported"));
    }
    if uncc.row_align_size != 0 || uncc.tile_align_size != 0 {
        return Err(unsupported("uncompressed row/tile alignment is not supported"));
    }
    for component in &uncc.components {
        if component.bit_depth_minus_one != 7 {
            return Err(Error::unsupported(
                Suberror::UnsupportedBitDepth,
                format!(
                    "uncompressed bit depth {} is not supported",
                    component.bit_depth_minus_one + 1
                ),
            ));
        }
        if component.format != 0 {
            return Err(unsupported("non-integer uncompressed components"));
        }
        if component.align_size != 0 {
            return Err(unsupported("uncompressed component alignment"));
        }
        let idx = component.component_index as usize;
        let Some(def) = cmpd.components.get(idx) else {
            return Err(Error::invalid_input(
                Suberror::InvalidProperty,
                "uncC component index out of range for cmpd",
            ));
        };
        if channel_for(def.component_type).is_none() {
            return Err(unsupported(format!(
                "uncompressed component type {} is not supported",
                def.component_type
            )));
        }
    }
    if uncc.components.is_empty() {
        return Err(Error::invalid_input(
            Suberror::InvalidProperty,
            "uncC declares no components",
        ));
    }
    Ok(())
}

fn colorspace_for(channels: &[Channel]) -> (Colorspace, Chroma) {
    let has = |c: Channel| channels.contains(&c);
    if has(Channel::R) || has(Channel::G) || has(Channel::B) {
        (Colorspace::Rgb, Chroma::C444)
    } else if has(Channel::Cb) || has(Channel::Cr) {
        (Colorspace::YCbCr, Chroma::C444)
    } else {
        (Colorspace::Monochrome, Chroma::Monochrome)
    }
}

/// Decodes an `unci` payload into planar pixels.
pub fn decode_uncompressed(
    data: &[u8],
    cmpd: &CmpdBox,
    uncc: &UncCBox,
    width: u32,
    height: u32,
) -> Result<PixelImage> {
    check_supported(cmpd, uncc)?;

    let channels: Vec<Channel> = uncc
        .components
        .iter()
        .map(|c| channel_for(cmpd.components[c.component_index as usize].component_type).unwrap())
        .collect();

    let plane_size = width as usize * height as usize;
    let needed = plane_size * channels.len();
    if data.len() < needed {
        return Err(Error::invalid_input(
            Suberror::EndOfData,
            format!(
                "uncompressed payload of {} bytes is smaller than the {needed} bytes the layout requires",
                data.len()
            ),
        ));
    }

    let (colorspace, chroma) = colorspace_for(&channels);
    let mut image = PixelImage::new(width, height, colorspace, chroma);
    for &channel in &channels {
        image.add_plane(channel, width, height, 8)?;
    }

    match uncc.interleave_type {
        INTERLEAVE_COMPONENT => {
            for (i, &channel) in channels.iter().enumerate() {
                let src = &data[i * plane_size..(i + 1) * plane_size];
                let plane = image.plane_mut(channel).expect("plane was just added");
                for y in 0..height {
                    let row_start = y as usize * width as usize;
                    plane
                        .row_mut(y)
                        .copy_from_slice(&src[row_start..row_start + width as usize]);
                }
            }
        }
        INTERLEAVE_PIXEL => {
            let n = channels.len();
            for (i, &channel) in channels.iter().enumerate() {
                let plane = image.plane_mut(channel).expect("plane was just added");
                for y in 0..height {
                    let row = plane.row_mut(y);
                    let src_row = y as usize * width as usize * n;
                    for x in 0..width as usize {
                        row[x] = data[src_row + x * n + i];
                    }
                }
            }
        }
        _ => unreachable!("gated by check_supported"),
    }

    Ok(image)
}

/// Decodes an `mski` payload: a monochrome mask at the `pixi` bit depth (1 or 8).
pub fn decode_mask(data: &[u8], bit_depth: u8, width: u32, height: u32) -> Result<PixelImage> {
    let mut image = PixelImage::new(width, height, Colorspace::Monochrome, Chroma::Monochrome);
    image.add_plane(Channel::Y, width, height, 8)?;
    let plane = image.plane_mut(Channel::Y).expect("plane was just added");

    match bit_depth {
        8 => {
            let needed = width as usize * height as usize;
            if data.len() < needed {
                return Err(Error::truncated("mask payload too short"));
            }
            for y in 0..height {
                let start = y as usize * width as usize;
                plane
                    .row_mut(y)
                    .copy_from_slice(&data[start..start + width as usize]);
            }
        }
        1 => {
            let row_bytes = (width as usize).div_ceil(8);
            if data.len() < row_bytes * height as usize {
                return Err(Error::truncated("mask payload too short"));
            }
            for y in 0..height {
                let row = plane.row_mut(y);
                for x in 0..width as usize {
                    let byte = data[y as usize * row_bytes + x / 8];
                    let bit = (byte >> (7 - (x % 8))) & 1;
                    row[x] = if bit != 0 { 0xff } else { 0 };
                }
            }
        }
        other => {
            return Err(Error::unsupported(
                Suberror::UnsupportedBitDepth,
                format!("mask bit depth {other} is not supported"),
            ));
        }
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use heif_bmff::boxes::{CmpdComponent, UncCComponent};

    fn rgb_config() -> (CmpdBox, UncCBox) {
        let cmpd = CmpdBox {
            components: [4u16, 5, 6]
                .iter()
                .map(|&t| CmpdComponent {
                    component_type: t,
                    component_type_uri: None,
                })
                .collect(),
        };
        let uncc = UncCBox {
            components: (0..3)
                .map(|i| UncCComponent {
                    component_index: i,
                    bit_depth_minus_one: 7,
                    format: 0,
                    align_size: 0,
                })
                .collect(),
            ..Default::default()
        };
        (cmpd, uncc)
    }

    #[test]
    fn planar_rgb() {
        let (cmpd, uncc) = rgb_config();
        let data: Vec<u8> = (0..12).map(|v| v * 10).collect();
        let image = decode_uncompressed(&data, &cmpd, &uncc, 2, 2, ).unwrap();
        assert_eq!(image.colorspace(), Colorspace::Rgb);
        assert_eq!(image.plane(Channel::R).unwrap().sample(1, 1), 30);
        assert_eq!(image.plane(Channel::G).unwrap().sample(0, 0), 40);
        assert_eq!(image.plane(Channel::B).unwrap().sample(1, 0), 90);
    }

    #[test]
    fn pixel_interleaved_rgb() {
        let (cmpd, mut uncc) = rgb_config();
        uncc.interleave_type = 1;
        let data: Vec<u8> = vec![
            1, 2, 3, /**/ 4, 5, 6, // row 0
            7, 8, 9, /**/ 10, 11, 12, // row 1
        ];
        let image = decode_uncompressed(&data, &cmpd, &uncc, 2, 2).unwrap();
        assert_eq!(image.plane(Channel::R).unwrap().sample(1, 0), 4);
        assert_eq!(image.plane(Channel::G).unwrap().sample(0, 1), 8);
        assert_eq!(image.plane(Channel::B).unwrap().sample(1, 1), 12);
    }

    #[test]
    fn tile_grids_are_unsupported() {
        let (cmpd, mut uncc) = rgb_config();
        uncc.num_tile_cols_minus_one = 1;
        let err = decode_uncompressed(&[0; 48], &cmpd, &uncc, 2, 2).unwrap_err();
        assert_eq!(err.kind, heif_bmff::ErrorKind::Unsupported);
    }

    #[test]
    fn one_bit_mask() {
        // 0b1010_0000 -> alternating on/off in a 4-wide row.
        let image = decode_mask(&[0b1010_0000, 0b0101_0000], 1, 4, 2).unwrap();
        let plane = image.plane(Channel::Y).unwrap();
        assert_eq!(plane.sample(0, 0), 0xff);
        assert_eq!(plane.sample(1, 0), 0);
        assert_eq!(plane.sample(0, 1), 0);
        assert_eq!(plane.sample(1, 1), 0xff);
    }
}

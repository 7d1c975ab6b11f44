//! Payload codecs for derived images: `grid` and `iovl` item bodies.
//!
//! These are not boxes; the bytes live in the item's `iloc` payload.

use heif_bmff::{Error, Result, Suberror};

/// Parsed body of a `grid` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGrid {
    pub rows: u16,
    pub columns: u16,
    pub output_width: u32,
    pub output_height: u32,
}

impl ImageGrid {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::invalid_input(
                Suberror::InvalidGridData,
                "grid body has less than 8 bytes",
            ));
        }
        let _version = data[0];
        let flags = data[1];
        let rows = data[2] as u16 + 1;
        let columns = data[3] as u16 + 1;

        let (output_width, output_height) = if flags & 1 != 0 {
            if data.len() < 12 {
                return Err(Error::invalid_input(
                    Suberror::InvalidGridData,
                    "grid body incomplete",
                ));
            }
            (
                u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            )
        } else {
            (
                u16::from_be_bytes([data[4], data[5]]) as u32,
                u16::from_be_bytes([data[6], data[7]]) as u32,
            )
        };

        Ok(Self {
            rows,
            columns,
            output_width,
            output_height,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let wide = self.output_width > 0xffff || self.output_height > 0xffff;
        let mut out = vec![0u8, u8::from(wide), (self.rows - 1) as u8, (self.columns - 1) as u8];
        if wide {
            out.extend_from_slice(&self.output_width.to_be_bytes());
            out.extend_from_slice(&self.output_height.to_be_bytes());
        } else {
            out.extend_from_slice(&(self.output_width as u16).to_be_bytes());
            out.extend_from_slice(&(self.output_height as u16).to_be_bytes());
        }
        out
    }

    pub fn tile_count(&self) -> u32 {
        self.rows as u32 * self.columns as u32
    }
}

/// Parsed body of an `iovl` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOverlay {
    /// RGBA background, 16 bits per channel.
    pub background_color: [u16; 4],
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Signed placement offsets, one per referenced image.
    pub offsets: Vec<(i32, i32)>,
}

impl ImageOverlay {
    pub fn parse(num_images: usize, data: &[u8]) -> Result<Self> {
        let too_short = || {
            Error::invalid_input(Suberror::InvalidOverlayData, "overlay body incomplete")
        };

        if data.len() < 2 {
            return Err(too_short());
        }
        let version = data[0];
        let flags = data[1];
        if version != 0 {
            return Err(Error::unsupported(
                Suberror::UnsupportedDataVersion,
                format!("overlay body version {version} is not implemented"),
            ));
        }

        let field_len = if flags & 1 != 0 { 4usize } else { 2 };
        let needed = 2 + 4 * 2 + 2 * field_len + num_images * 2 * field_len;
        if data.len() < needed {
            return Err(too_short());
        }

        let mut pos = 2usize;
        let mut read_u16 = |data: &[u8], pos: &mut usize| {
            let v = u16::from_be_bytes([data[*pos], data[*pos + 1]]);
            *pos += 2;
            v
        };
        let read_field = |data: &[u8], pos: &mut usize| -> u32 {
            if field_len == 4 {
                let v = u32::from_be_bytes([data[*pos], data[*pos + 1], data[*pos + 2], data[*pos + 3]]);
                *pos += 4;
                v
            } else {
                let v = u16::from_be_bytes([data[*pos], data[*pos + 1]]) as u32;
                *pos += 2;
                v
            }
        };
        let read_signed = |data: &[u8], pos: &mut usize| -> i32 {
            if field_len == 4 {
                read_field(data, pos) as i32
            } else {
                let v = u16::from_be_bytes([data[*pos], data[*pos + 1]]) as i16;
                *pos += 2;
                v as i32
            }
        };

        let mut background_color = [0u16; 4];
        for c in &mut background_color {
            *c = read_u16(data, &mut pos);
        }
        let canvas_width = read_field(data, &mut pos);
        let canvas_height = read_field(data, &mut pos);

        let mut offsets = Vec::with_capacity(num_images);
        for _ in 0..num_images {
            let x = read_signed(data, &mut pos);
            let y = read_signed(data, &mut pos);
            offsets.push((x, y));
        }

        Ok(Self {
            background_color,
            canvas_width,
            canvas_height,
            offsets,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let wide = self.canvas_width > 0xffff
            || self.canvas_height > 0xffff
            || self
                .offsets
                .iter()
                .any(|&(x, y)| !(-0x8000..=0x7fff).contains(&x) || !(-0x8000..=0x7fff).contains(&y));
        let mut out = vec![0u8, u8::from(wide)];
        for c in self.background_color {
            out.extend_from_slice(&c.to_be_bytes());
        }
        if wide {
            out.extend_from_slice(&self.canvas_width.to_be_bytes());
            out.extend_from_slice(&self.canvas_height.to_be_bytes());
            for &(x, y) in &self.offsets {
                out.extend_from_slice(&x.to_be_bytes());
                out.extend_from_slice(&y.to_be_bytes());
            }
        } else {
            out.extend_from_slice(&(self.canvas_width as u16).to_be_bytes());
            out.extend_from_slice(&(self.canvas_height as u16).to_be_bytes());
            for &(x, y) in &self.offsets {
                out.extend_from_slice(&(x as i16).to_be_bytes());
                out.extend_from_slice(&(y as i16).to_be_bytes());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_roundtrip() {
        let grid = ImageGrid {
            rows: 2,
            columns: 3,
            output_width: 1920,
            output_height: 1080,
        };
        let parsed = ImageGrid::parse(&grid.to_bytes()).unwrap();
        assert_eq!(parsed, grid);
        assert_eq!(parsed.tile_count(), 6);
    }

    #[test]
    fn grid_wide_fields() {
        let grid = ImageGrid {
            rows: 1,
            columns: 1,
            output_width: 70000,
            output_height: 12,
        };
        let bytes = grid.to_bytes();
        assert_eq!(bytes[1], 1); // 32-bit field flag
        assert_eq!(ImageGrid::parse(&bytes).unwrap(), grid);
    }

    #[test]
    fn overlay_roundtrip() {
        let overlay = ImageOverlay {
            background_color: [0xffff, 0, 0, 0xffff],
            canvas_width: 256,
            canvas_height: 128,
            offsets: vec![(0, 0), (-10, 300)],
        };
        let parsed = ImageOverlay::parse(2, &overlay.to_bytes()).unwrap();
        assert_eq!(parsed, overlay);
    }

    #[test]
    fn overlay_rejects_short_body() {
        assert!(ImageOverlay::parse(4, &[0, 0, 1, 2, 3]).is_err());
    }
}

use heif_bitstream::{BitstreamRange, StreamWriter};

use crate::error::{Error, Result, Suberror};
use crate::fourcc::FourCC;

/// Version and flags word of a FullBox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullBoxHeader {
    pub version: u8,
    pub flags: u32,
}

impl FullBoxHeader {
    pub fn new(version: u8, flags: u32) -> Self {
        debug_assert_eq!(flags & 0xff00_0000, 0);
        Self { version, flags }
    }
}

/// Generic box header: size, type, optional 64-bit size, optional UUID, optional FullBox word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: FourCC,
    /// Total box size including the header. Zero means "extends to the end of the file" and is
    /// resolved by the caller.
    pub size: u64,
    pub header_size: u32,
    pub uuid: Option<[u8; 16]>,
    pub full: Option<FullBoxHeader>,
}

impl BoxHeader {
    pub fn new(box_type: FourCC) -> Self {
        Self {
            box_type,
            size: 0,
            header_size: 8,
            uuid: None,
            full: None,
        }
    }

    pub fn full_box(box_type: FourCC, version: u8, flags: u32) -> Self {
        Self {
            full: Some(FullBoxHeader::new(version, flags)),
            ..Self::new(box_type)
        }
    }

    /// Parses `size`, `type`, the 64-bit large size and the UUID extension.
    ///
    /// The FullBox word is read separately by [`read_full`][Self::read_full] because only the
    /// typed parsers know whether their box is a FullBox.
    pub fn parse(range: &mut BitstreamRange<'_>) -> Self {
        let mut size = range.read_u32() as u64;
        let box_type = FourCC(range.read_fixed::<4>());
        let mut header_size = 8u32;

        if size == 1 {
            size = range.read_u64();
            header_size += 8;
        }

        let uuid = if box_type == FourCC::UUID {
            header_size += 16;
            Some(range.read_fixed::<16>())
        } else {
            None
        };

        Self {
            box_type,
            size,
            header_size,
            uuid,
            full: None,
        }
    }

    /// Reads the (version, flags) word of a FullBox.
    pub fn read_full(&mut self, range: &mut BitstreamRange<'_>) {
        let word = range.read_u32();
        self.full = Some(FullBoxHeader {
            version: (word >> 24) as u8,
            flags: word & 0x00ff_ffff,
        });
        self.header_size += 4;
    }

    /// Reads the FullBox word and rejects versions above `max_version`.
    pub fn read_full_checked(
        &mut self,
        range: &mut BitstreamRange<'_>,
        max_version: u8,
    ) -> Result<()> {
        self.read_full(range);
        let version = self.version();
        if version > max_version {
            return Err(Error::invalid_input(
                Suberror::UnsupportedDataVersion,
                format!("{} box version {version} is not supported", self.box_type),
            ));
        }
        Ok(())
    }

    pub fn version(&self) -> u8 {
        self.full.map(|f| f.version).unwrap_or(0)
    }

    pub fn flags(&self) -> u32 {
        self.full.map(|f| f.flags).unwrap_or(0)
    }

    pub fn is_full_box(&self) -> bool {
        self.full.is_some()
    }

    pub fn set_version_flags(&mut self, version: u8, flags: u32) {
        self.full = Some(FullBoxHeader::new(version, flags));
    }

    /// Payload size, or `None` when the declared size is smaller than the header.
    pub fn content_size(&self) -> Option<u64> {
        self.size.checked_sub(self.header_size as u64)
    }

    /// Reserves space for this header in the writer and returns the patch position.
    ///
    /// The reservation is 8 bytes, or 12 for a FullBox; [`prepend`][Self::prepend] grows it in
    /// place when the final header needs the 64-bit size or a UUID.
    pub fn reserve(&self, writer: &mut StreamWriter) -> usize {
        let start = writer.position();
        writer.skip(if self.is_full_box() { 12 } else { 8 });
        start
    }

    /// Back-patches the header at `box_start` once the payload has been written.
    ///
    /// Promotes to the 64-bit size field when the total would not fit in 32 bits.
    pub fn prepend(&self, writer: &mut StreamWriter, box_start: usize) {
        let reserved = if self.is_full_box() { 12usize } else { 8 };

        let mut header_size = 8usize;
        if self.is_full_box() {
            header_size += 4;
        }
        if self.uuid.is_some() {
            header_size += 16;
        }

        let data_size = (writer.data_size() - box_start - reserved) as u64;
        let large = data_size + header_size as u64 > u32::MAX as u64;
        if large {
            header_size += 8;
        }
        let box_size = data_size + header_size as u64;

        writer.set_position(box_start);
        writer.insert(header_size - reserved);

        if large {
            writer.write_u32(1);
            writer.write_bytes(&self.box_type.0);
            writer.write_u64(box_size);
        } else {
            writer.write_u32(box_size as u32);
            writer.write_bytes(&self.box_type.0);
        }

        if let Some(uuid) = &self.uuid {
            writer.write_bytes(uuid);
        }

        if let Some(full) = self.full {
            debug_assert_eq!(full.flags & 0xff00_0000, 0);
            writer.write_u32(((full.version as u32) << 24) | full.flags);
        }

        writer.set_position_to_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heif_bitstream::{MemorySource, SourceCursor};

    fn parse_bytes(bytes: &[u8]) -> BoxHeader {
        let source = MemorySource::new(bytes.to_vec());
        let mut cursor = SourceCursor::new(&source);
        let mut range = BitstreamRange::new(&mut cursor, bytes.len() as u64);
        BoxHeader::parse(&mut range)
    }

    #[test]
    fn plain_header() {
        let header = parse_bytes(&[0, 0, 0, 16, b'f', b't', b'y', b'p', 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(header.box_type, FourCC::FTYP);
        assert_eq!(header.size, 16);
        assert_eq!(header.header_size, 8);
    }

    #[test]
    fn large_size_header() {
        let mut bytes = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        bytes.extend_from_slice(&(0x1_0000_0010u64).to_be_bytes());
        let header = parse_bytes(&bytes);
        assert_eq!(header.box_type, FourCC::MDAT);
        assert_eq!(header.size, 0x1_0000_0010);
        assert_eq!(header.header_size, 16);
    }

    #[test]
    fn uuid_header() {
        let mut bytes = vec![0, 0, 0, 24, b'u', b'u', b'i', b'd'];
        bytes.extend_from_slice(&[9; 16]);
        let header = parse_bytes(&bytes);
        assert_eq!(header.uuid, Some([9; 16]));
        assert_eq!(header.header_size, 24);
    }

    #[test]
    fn reserve_and_prepend_small() {
        let header = BoxHeader::new(FourCC::FREE);
        let mut w = StreamWriter::new();
        let start = header.reserve(&mut w);
        w.write_bytes(&[1, 2, 3, 4]);
        header.prepend(&mut w, start);
        assert_eq!(w.data(), &[0, 0, 0, 12, b'f', b'r', b'e', b'e', 1, 2, 3, 4]);
    }

    #[test]
    fn prepend_full_box() {
        let header = BoxHeader::full_box(FourCC::META, 0, 0);
        let mut w = StreamWriter::new();
        let start = header.reserve(&mut w);
        header.prepend(&mut w, start);
        assert_eq!(w.data(), &[0, 0, 0, 12, b'm', b'e', b't', b'a', 0, 0, 0, 0]);
    }
}

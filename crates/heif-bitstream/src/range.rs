use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

/// Positional byte source backing a parsed file.
///
/// Implementations must support concurrent positional reads; sources that are not intrinsically
/// thread-safe (like [`FileSource`]) guard themselves internally.
pub trait ByteSource: Send + Sync {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// Reads up to `buf.len()` bytes at `offset` and returns the number of bytes read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory byte source.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let Ok(offset) = usize::try_from(offset) else {
            return 0;
        };
        if offset >= self.data.len() {
            return 0;
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }
}

/// File-backed byte source. Seeks are guarded by a mutex so that shared positional reads stay
/// consistent.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn new(file: File) -> std::io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> usize {
        let mut file = self.file.lock().expect("file source poisoned");
        if file.seek(SeekFrom::Start(offset)).is_err() {
            return 0;
        }
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(_) => break,
            }
        }
        total
    }
}

/// Supplier side of a [`BitstreamRange`] chain.
///
/// Implemented by [`SourceCursor`] at the root and by `BitstreamRange` itself so that nested
/// ranges consume through their parents.
pub trait RangeSource {
    /// Reads exactly `out.len()` bytes, or fails without partial delivery.
    fn pull(&mut self, out: &mut [u8]) -> bool;

    /// Skips `n` bytes forward.
    fn advance(&mut self, n: u64) -> bool;

    /// Absolute position in the underlying source.
    fn position(&self) -> u64;

    /// Marks this level and everything above it as exhausted.
    fn mark_eof(&mut self);
}

/// Sequential cursor over a [`ByteSource`], the root of every range chain.
pub struct SourceCursor<'a> {
    source: &'a dyn ByteSource,
    pos: u64,
}

impl<'a> SourceCursor<'a> {
    pub fn new(source: &'a dyn ByteSource) -> Self {
        Self { source, pos: 0 }
    }

    pub fn at(source: &'a dyn ByteSource, pos: u64) -> Self {
        Self { source, pos }
    }

    pub fn remaining(&self) -> u64 {
        self.source.len().saturating_sub(self.pos)
    }
}

impl RangeSource for SourceCursor<'_> {
    fn pull(&mut self, out: &mut [u8]) -> bool {
        let n = self.source.read_at(self.pos, out);
        if n != out.len() {
            // Do not advance past a short read; the range above reports the error.
            return false;
        }
        self.pos += n as u64;
        true
    }

    fn advance(&mut self, n: u64) -> bool {
        let end = self.source.len();
        let target = self.pos.saturating_add(n);
        self.pos = target.min(end);
        target <= end
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn mark_eof(&mut self) {}
}

/// Bounded big-endian byte reader.
///
/// All reads are big-endian. A read that would cross the end of the range consumes whatever is
/// left, poisons the range and its ancestors, and yields a zero value; every later read
/// short-circuits. This keeps box parsers free of per-read error plumbing: they read their
/// fields unconditionally and check [`error`][Self::error] once at the end.
pub struct BitstreamRange<'a> {
    source: &'a mut dyn RangeSource,
    remaining: u64,
    eof: bool,
    error: bool,
}

impl<'a> BitstreamRange<'a> {
    pub fn new(source: &'a mut dyn RangeSource, length: u64) -> Self {
        Self {
            source,
            remaining: length,
            eof: length == 0,
            error: false,
        }
    }

    /// Creates a child range over the next `length` bytes of this range.
    ///
    /// Bytes read from the child are accounted against this range as well.
    pub fn sub_range(&mut self, length: u64) -> BitstreamRange<'_> {
        BitstreamRange {
            source: self,
            remaining: length,
            eof: length == 0,
            error: false,
        }
    }

    /// Number of unread bytes left in this range.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Whether the end of the range has been reached (by reading or by an over-read).
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Whether a read over-ran this range.
    pub fn error(&self) -> bool {
        self.error
    }

    /// Absolute position of the cursor in the underlying source.
    pub fn position(&self) -> u64 {
        self.source.position()
    }

    fn fail(&mut self) {
        let rest = self.remaining;
        if rest > 0 {
            self.source.advance(rest);
        }
        self.remaining = 0;
        self.error = true;
        self.mark_eof();
    }

    fn read_data(&mut self, out: &mut [u8]) -> bool {
        if self.error {
            return false;
        }
        let n = out.len() as u64;
        if self.remaining < n {
            self.fail();
            return false;
        }
        if !self.source.pull(out) {
            self.remaining = 0;
            self.error = true;
            self.mark_eof();
            return false;
        }
        self.remaining -= n;
        if self.remaining == 0 {
            self.eof = true;
        }
        true
    }

    pub fn read_u8(&mut self) -> u8 {
        let mut buf = [0u8; 1];
        self.read_data(&mut buf);
        buf[0]
    }

    pub fn read_u16(&mut self) -> u16 {
        let mut buf = [0u8; 2];
        self.read_data(&mut buf);
        u16::from_be_bytes(buf)
    }

    pub fn read_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.read_data(&mut buf);
        u32::from_be_bytes(buf)
    }

    pub fn read_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.read_data(&mut buf);
        u64::from_be_bytes(buf)
    }

    pub fn read_i32(&mut self) -> i32 {
        self.read_u32() as i32
    }

    /// Reads an unsigned integer of `size` bytes, where `size` is 0, 4 or 8.
    ///
    /// Variable-width table fields (`iloc` offsets and friends) use this.
    pub fn read_sized(&mut self, size: u8) -> u64 {
        match size {
            0 => 0,
            4 => self.read_u32() as u64,
            8 => self.read_u64(),
            _ => {
                self.fail();
                0
            }
        }
    }

    /// Reads exactly `n` bytes, or returns an empty vector on over-read.
    pub fn read_bytes(&mut self, n: usize) -> Vec<u8> {
        if self.error || (n as u64) > self.remaining {
            self.fail();
            return Vec::new();
        }
        let mut buf = vec![0u8; n];
        if !self.read_data(&mut buf) {
            return Vec::new();
        }
        buf
    }

    pub fn read_fixed<const N: usize>(&mut self) -> [u8; N] {
        let mut buf = [0u8; N];
        self.read_data(&mut buf);
        buf
    }

    /// Reads a NUL-terminated string. Invalid UTF-8 is replaced lossily.
    pub fn read_nul_string(&mut self) -> String {
        let mut bytes = Vec::new();
        while !self.eof && !self.error {
            let b = self.read_u8();
            if b == 0 || self.error {
                break;
            }
            bytes.push(b);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Skips `n` bytes. Over-skips poison the range like over-reads do.
    pub fn skip(&mut self, n: u64) {
        if self.error {
            return;
        }
        if self.remaining < n {
            self.fail();
            return;
        }
        self.source.advance(n);
        self.remaining -= n;
        if self.remaining == 0 {
            self.eof = true;
        }
    }

    /// Consumes whatever is left in this range, leaving it at its end without error.
    pub fn skip_to_end(&mut self) {
        if self.remaining > 0 {
            self.source.advance(self.remaining);
            self.remaining = 0;
        }
        self.eof = true;
    }
}

impl RangeSource for BitstreamRange<'_> {
    fn pull(&mut self, out: &mut [u8]) -> bool {
        self.read_data(out)
    }

    fn advance(&mut self, n: u64) -> bool {
        if self.error {
            return false;
        }
        if self.remaining < n {
            self.fail();
            return false;
        }
        let ok = self.source.advance(n);
        self.remaining -= n;
        if self.remaining == 0 {
            self.eof = true;
        }
        ok
    }

    fn position(&self) -> u64 {
        self.source.position()
    }

    fn mark_eof(&mut self) {
        self.remaining = 0;
        self.eof = true;
        self.source.mark_eof();
    }
}

impl std::fmt::Debug for BitstreamRange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitstreamRange")
            .field("remaining", &self.remaining)
            .field("eof", &self.eof)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_over<'a>(cursor: &'a mut SourceCursor<'_>, len: u64) -> BitstreamRange<'a> {
        BitstreamRange::new(cursor, len)
    }

    #[test]
    fn big_endian_reads() {
        let source = MemorySource::new(vec![0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0]);
        let mut cursor = SourceCursor::new(&source);
        let mut range = range_over(&mut cursor, 8);

        assert_eq!(range.read_u16(), 0x1234);
        assert_eq!(range.read_u32(), 0x5678_9abc);
        assert_eq!(range.read_u8(), 0xde);
        assert!(!range.eof());
        assert_eq!(range.read_u8(), 0xf0);
        assert!(range.eof());
        assert!(!range.error());
    }

    #[test]
    fn over_read_short_circuits() {
        let source = MemorySource::new(vec![1, 2, 3, 4]);
        let mut cursor = SourceCursor::new(&source);
        let mut range = range_over(&mut cursor, 3);

        assert_eq!(range.read_u32(), 0);
        assert!(range.eof());
        assert!(range.error());
        // Everything after the failure is a zero value.
        assert_eq!(range.read_u16(), 0);
        assert_eq!(range.read_bytes(1), Vec::<u8>::new());
    }

    #[test]
    fn sub_range_consumes_parent() {
        let source = MemorySource::new((0u8..16).collect());
        let mut cursor = SourceCursor::new(&source);
        let mut parent = range_over(&mut cursor, 16);

        {
            let mut child = parent.sub_range(4);
            assert_eq!(child.read_u32(), 0x0001_0203);
            assert!(child.eof());
        }
        assert_eq!(parent.remaining(), 12);
        assert_eq!(parent.read_u8(), 4);
    }

    #[test]
    fn child_over_read_poisons_parent() {
        let source = MemorySource::new((0u8..16).collect());
        let mut cursor = SourceCursor::new(&source);
        let mut parent = range_over(&mut cursor, 8);

        {
            // The child claims more bytes than the parent holds.
            let mut child = parent.sub_range(12);
            assert_eq!(child.read_u64(), 0x0001_0203_0405_0607);
            assert_eq!(child.read_u32(), 0);
            assert!(child.error());
        }
        assert!(parent.eof());
    }

    #[test]
    fn nul_string() {
        let source = MemorySource::new(b"mime\0rest".to_vec());
        let mut cursor = SourceCursor::new(&source);
        let mut range = range_over(&mut cursor, 9);
        assert_eq!(range.read_nul_string(), "mime");
        assert_eq!(range.remaining(), 4);
    }
}

//! Generic `tag + u32 length + payload` chunk framing
//!
//! Chunk lengths are big-endian and exclude the 8-byte header and the
//! optional pad byte that follows an odd-length payload.

use bytes::{Buf, BufMut};
use std::io::{self, Read, Seek, SeekFrom, Write};

use super::format::{ChunkTag, CHUNK_HEADER_LEN};
use crate::error::ContainerError;

/// Chunk tag and payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub tag: ChunkTag,
    pub length: u32,
}

impl ChunkHeader {
    pub fn new(tag: ChunkTag, length: u32) -> Self {
        Self { tag, length }
    }

    pub fn encode(&self) -> [u8; CHUNK_HEADER_LEN as usize] {
        let mut out = [0u8; CHUNK_HEADER_LEN as usize];
        let mut buf = &mut out[..];
        buf.put_slice(self.tag.as_bytes());
        buf.put_u32(self.length);
        out
    }

    pub fn decode(bytes: [u8; CHUNK_HEADER_LEN as usize]) -> Self {
        let mut buf = &bytes[..];
        let mut tag = [0u8; 4];
        buf.copy_to_slice(&mut tag);
        Self {
            tag: ChunkTag(tag),
            length: buf.get_u32(),
        }
    }
}

/// Write an 8-byte chunk header.
///
/// Pass `0` when the length is not known yet and patch it later.
pub fn write_chunk_header<W: Write>(sink: &mut W, tag: ChunkTag, length: u32) -> io::Result<()> {
    sink.write_all(&ChunkHeader::new(tag, length).encode())
}

/// Byte range inside the underlying source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub start: u64,
    pub len: u64,
}

impl Section {
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Drop the first `n` bytes of the range
    pub fn skip(&self, n: u64) -> Result<Section, ContainerError> {
        if n > self.len {
            return Err(ContainerError::TruncatedInput {
                needed: n,
                available: self.len,
            });
        }
        Ok(Section::new(self.start + n, self.len - n))
    }

    /// Read up to `max` bytes from the start of the range
    pub fn read_prefix<R: Read + Seek>(
        &self,
        reader: &mut R,
        max: usize,
    ) -> Result<Vec<u8>, ContainerError> {
        let n = (self.len as usize).min(max);
        let mut buf = vec![0u8; n];
        reader.seek(SeekFrom::Start(self.start))?;
        read_exact_or_truncated(reader, &mut buf)?;
        Ok(buf)
    }
}

/// A chunk located by [`ChunkScanner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub header: ChunkHeader,
    pub body: Section,
}

impl Chunk {
    pub fn tag(&self) -> ChunkTag {
        self.header.tag
    }
}

/// Walks sibling chunks inside a byte range.
///
/// The scanner only tracks offsets; every call seeks the reader, so it
/// can share the reader with whoever reads the chunk bodies.
#[derive(Debug, Clone)]
pub struct ChunkScanner {
    pos: u64,
    end: u64,
}

impl ChunkScanner {
    pub fn new(range: Section) -> Self {
        Self {
            pos: range.start,
            end: range.end(),
        }
    }

    /// Next chunk, or `None` once the range ends exactly on a chunk boundary
    pub fn next_chunk<R: Read + Seek>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Chunk>, ContainerError> {
        let available = self.end - self.pos;
        if available == 0 {
            return Ok(None);
        }
        if available < CHUNK_HEADER_LEN {
            return Err(ContainerError::TruncatedInput {
                needed: CHUNK_HEADER_LEN,
                available,
            });
        }

        reader.seek(SeekFrom::Start(self.pos))?;
        let mut raw = [0u8; CHUNK_HEADER_LEN as usize];
        read_exact_or_truncated(reader, &mut raw)?;
        let header = ChunkHeader::decode(raw);

        let needed = CHUNK_HEADER_LEN + header.length as u64;
        if needed > available {
            return Err(ContainerError::TruncatedInput { needed, available });
        }

        let body = Section::new(self.pos + CHUNK_HEADER_LEN, header.length as u64);
        self.pos = body.end();

        if header.length % 2 == 1 {
            if self.pos < self.end {
                self.pos += 1;
            } else {
                tracing::warn!("Chunk '{}' has odd length and no pad byte", header.tag);
            }
        }

        Ok(Some(Chunk { header, body }))
    }

    /// Current offset in the underlying source
    pub fn position(&self) -> u64 {
        self.pos
    }
}

/// `read_exact`, mapping a short read to `TruncatedInput`
pub(crate) fn read_exact_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), ContainerError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ContainerError::TruncatedInput {
            needed: buf.len() as u64,
            available: 0,
        }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn chunk_bytes(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_chunk_header(&mut out, ChunkTag(*tag), payload.len() as u32).unwrap();
        out.extend_from_slice(payload);
        out
    }

    fn whole(data: &[u8]) -> Section {
        Section::new(0, data.len() as u64)
    }

    #[test]
    fn test_header_encoding() {
        let header = ChunkHeader::new(ChunkTag::COMM, 18);
        assert_eq!(&header.encode(), b"COMM\x00\x00\x00\x12");
        assert_eq!(ChunkHeader::decode(header.encode()), header);
    }

    #[test]
    fn test_scan_siblings() {
        let mut data = chunk_bytes(b"ABCD", &[1, 2, 3, 4]);
        data.extend(chunk_bytes(b"WXYZ", &[9, 9]));
        let mut reader = Cursor::new(data.clone());
        let mut scanner = ChunkScanner::new(whole(&data));

        let first = scanner.next_chunk(&mut reader).unwrap().unwrap();
        assert_eq!(first.tag(), ChunkTag(*b"ABCD"));
        assert_eq!(first.body, Section::new(8, 4));

        let second = scanner.next_chunk(&mut reader).unwrap().unwrap();
        assert_eq!(second.tag(), ChunkTag(*b"WXYZ"));
        assert_eq!(second.body.read_prefix(&mut reader, 64).unwrap(), vec![9, 9]);

        assert!(scanner.next_chunk(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_empty_range_ends_cleanly() {
        let mut reader = Cursor::new(Vec::new());
        let mut scanner = ChunkScanner::new(Section::new(0, 0));
        assert!(scanner.next_chunk(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_stray_bytes_are_truncation() {
        let mut data = chunk_bytes(b"ABCD", &[0; 4]);
        data.extend_from_slice(&[1, 2, 3]);
        let mut reader = Cursor::new(data.clone());
        let mut scanner = ChunkScanner::new(whole(&data));

        scanner.next_chunk(&mut reader).unwrap();
        let err = scanner.next_chunk(&mut reader).unwrap_err();
        assert!(matches!(
            err,
            ContainerError::TruncatedInput { needed: 8, available: 3 }
        ));
    }

    #[test]
    fn test_length_overrun_is_truncation() {
        let mut data = Vec::new();
        write_chunk_header(&mut data, ChunkTag::SSND, 100).unwrap();
        data.extend_from_slice(&[0; 10]);
        let mut reader = Cursor::new(data.clone());
        let mut scanner = ChunkScanner::new(whole(&data));

        let err = scanner.next_chunk(&mut reader).unwrap_err();
        assert!(matches!(
            err,
            ContainerError::TruncatedInput { needed: 108, available: 18 }
        ));
    }

    #[test]
    fn test_odd_length_skips_pad_byte() {
        let mut data = chunk_bytes(b"ODD ", &[7, 7, 7]);
        data.push(0);
        data.extend(chunk_bytes(b"NEXT", &[1, 2]));
        let mut reader = Cursor::new(data.clone());
        let mut scanner = ChunkScanner::new(whole(&data));

        let odd = scanner.next_chunk(&mut reader).unwrap().unwrap();
        assert_eq!(odd.body.len, 3);
        let next = scanner.next_chunk(&mut reader).unwrap().unwrap();
        assert_eq!(next.tag(), ChunkTag(*b"NEXT"));
        assert!(scanner.next_chunk(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_odd_length_without_pad_at_end() {
        let data = chunk_bytes(b"ODD ", &[7, 7, 7]);
        let mut reader = Cursor::new(data.clone());
        let mut scanner = ChunkScanner::new(whole(&data));

        scanner.next_chunk(&mut reader).unwrap().unwrap();
        assert!(scanner.next_chunk(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_section_skip() {
        let section = Section::new(10, 20);
        assert_eq!(section.skip(8).unwrap(), Section::new(18, 12));
        assert!(section.skip(21).is_err());
    }
}

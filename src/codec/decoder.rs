//! AIFF container reader
//!
//! Parses the FORM/AIFF envelope once, decodes the COMM chunk and hands
//! the SSND payload out as a bounded [`SampleSource`].

use bytes::Buf;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::chunk::{read_exact_or_truncated, Chunk, ChunkScanner, Section};
use super::format::{ChunkTag, FormatDescriptor, BYTES_PER_SAMPLE, COMM_LEN, SSND_SUBHEADER_LEN};
use crate::constants::SAMPLE_RATE;
use crate::error::ContainerError;

/// Big-endian int32 samples inside the SSND payload.
///
/// Reads never go past the end of the chunk, whatever the COMM sample
/// count claims.
pub struct SampleSource<R> {
    reader: R,
    section: Section,
    /// Byte position relative to `section.start`
    pos: u64,
    /// Decode buffer (reused to avoid allocations)
    scratch: Vec<u8>,
}

impl<R: Read + Seek> SampleSource<R> {
    /// Wrap `section` of `reader`, positioned at its first sample
    pub fn new(mut reader: R, section: Section) -> Result<Self, ContainerError> {
        reader.seek(SeekFrom::Start(section.start))?;
        Ok(Self {
            reader,
            section,
            pos: 0,
            scratch: Vec::new(),
        })
    }

    /// Whole samples in the payload
    pub fn len_samples(&self) -> u64 {
        self.section.len / BYTES_PER_SAMPLE
    }

    /// Index of the next sample to be read
    pub fn position(&self) -> u64 {
        self.pos / BYTES_PER_SAMPLE
    }

    pub fn remaining_samples(&self) -> u64 {
        self.len_samples() - self.position()
    }

    pub fn seek_to_sample(&mut self, index: u64) -> Result<(), ContainerError> {
        if index > self.len_samples() {
            return Err(ContainerError::TruncatedInput {
                needed: index * BYTES_PER_SAMPLE,
                available: self.section.len,
            });
        }
        self.pos = index * BYTES_PER_SAMPLE;
        self.reader.seek(SeekFrom::Start(self.section.start + self.pos))?;
        Ok(())
    }

    /// Decode up to `out.len()` samples into the front of `out`.
    ///
    /// Returns how many were written; `0` means the source is exhausted.
    /// Slots past the returned count are left untouched.
    pub fn read_samples(&mut self, out: &mut [i32]) -> Result<usize, ContainerError> {
        let n = out.len().min(self.remaining_samples() as usize);
        if n == 0 {
            return Ok(0);
        }

        let bytes = n * BYTES_PER_SAMPLE as usize;
        if self.scratch.len() < bytes {
            self.scratch.resize(bytes, 0);
        }
        read_exact_or_truncated(&mut self.reader, &mut self.scratch[..bytes])?;
        self.pos += bytes as u64;

        let mut buf = &self.scratch[..bytes];
        for slot in &mut out[..n] {
            *slot = buf.get_i32();
        }
        Ok(n)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// A parsed input container
pub struct Container<R> {
    pub format: FormatDescriptor,
    pub source: SampleSource<R>,
    /// Every top-level chunk inside FORM, in file order
    pub chunks: Vec<Chunk>,
}

impl<R> Container<R> {
    pub fn into_parts(self) -> (FormatDescriptor, SampleSource<R>) {
        (self.format, self.source)
    }
}

/// Open and parse an AIFF file
pub fn open_container(path: impl AsRef<Path>) -> Result<Container<BufReader<File>>, ContainerError> {
    let file = File::open(path.as_ref())?;
    read_container(BufReader::new(file))
}

/// Parse an AIFF container from any seekable source
pub fn read_container<R: Read + Seek>(mut reader: R) -> Result<Container<R>, ContainerError> {
    let file_len = reader.seek(SeekFrom::End(0))?;

    let mut outer = ChunkScanner::new(Section::new(0, file_len));
    let form = outer
        .next_chunk(&mut reader)?
        .ok_or(ContainerError::TruncatedInput {
            needed: 8,
            available: 0,
        })?;
    if form.tag() != ChunkTag::FORM {
        return Err(ContainerError::BadContainer {
            expected: ChunkTag::FORM,
            found: form.tag(),
        });
    }

    let form_type = form.body.read_prefix(&mut reader, 4)?;
    let form_type: [u8; 4] = form_type
        .as_slice()
        .try_into()
        .map_err(|_| ContainerError::TruncatedInput {
            needed: 4,
            available: form.body.len,
        })?;
    if ChunkTag(form_type) != ChunkTag::AIFF {
        return Err(ContainerError::BadContainer {
            expected: ChunkTag::AIFF,
            found: ChunkTag(form_type),
        });
    }

    let mut format = None;
    let mut data = None;
    let mut chunks = Vec::new();

    let mut scanner = ChunkScanner::new(form.body.skip(4)?);
    while let Some(chunk) = scanner.next_chunk(&mut reader)? {
        chunks.push(chunk);
        match chunk.tag() {
            ChunkTag::COMM => {
                let payload = chunk.body.read_prefix(&mut reader, COMM_LEN as usize)?;
                format = Some(FormatDescriptor::decode(&payload)?);
            }
            ChunkTag::SSND => {
                // offset and block size are not used
                data = Some(chunk.body.skip(SSND_SUBHEADER_LEN as u64)?);
            }
            other => {
                tracing::debug!("Ignoring unknown chunk '{}' ({} bytes)", other, chunk.body.len);
            }
        }
    }

    let format = format.ok_or(ContainerError::MissingChunk(ChunkTag::COMM))?;
    let data = data.ok_or(ContainerError::MissingChunk(ChunkTag::SSND))?;

    if !format.is_mono_int32() {
        tracing::warn!(
            "Source is {} channel(s) at {} bits; samples are streamed as mono int32",
            format.channels,
            format.bits_per_sample
        );
    }
    match format.sample_rate_hz() {
        Some(hz) if hz == SAMPLE_RATE as f64 => {}
        Some(hz) => tracing::warn!("Source sample rate is {} Hz, playing at {} Hz", hz, SAMPLE_RATE),
        None => tracing::warn!("Source sample rate is not a finite number"),
    }

    let source = SampleSource::new(reader, data)?;
    if format.declared_samples() > source.len_samples() {
        tracing::warn!(
            "COMM declares {} samples but SSND holds {}",
            format.sample_count,
            source.len_samples()
        );
    }

    Ok(Container {
        format,
        source,
        chunks,
    })
}

//! AIFF container writer
//!
//! Writes the fixed 54-byte header with zeroed length fields, appends
//! samples as they arrive and patches the three lengths once the final
//! sample count is known.

use bytes::BufMut;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use super::chunk::write_chunk_header;
use super::format::{
    data_chunk_length, outer_length, ChunkTag, FormatDescriptor, BYTES_PER_SAMPLE, COMM_LEN,
    DATA_LENGTH_OFFSET, DATA_START, MAX_SAMPLES, OUTER_LENGTH_OFFSET, SAMPLE_COUNT_OFFSET,
    SSND_SUBHEADER_LEN,
};
use crate::error::ContainerError;

/// Lengths written by finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Finalized {
    pub total_samples: u64,
    pub outer_length: u32,
    pub data_chunk_length: u32,
}

impl Finalized {
    pub fn for_samples(total_samples: u64) -> Result<Self, ContainerError> {
        let too_large = ContainerError::TooLarge {
            samples: total_samples,
        };
        match (outer_length(total_samples), data_chunk_length(total_samples)) {
            (Some(outer_length), Some(data_chunk_length)) if total_samples <= MAX_SAMPLES => {
                Ok(Self {
                    total_samples,
                    outer_length,
                    data_chunk_length,
                })
            }
            _ => Err(too_large),
        }
    }
}

/// Output container being recorded into
pub struct ContainerWriter<W: Write + Seek> {
    writer: Option<W>,
    /// Stream position of the FORM tag
    base: u64,
    samples_written: u64,
    finalized: Option<Finalized>,
    /// Set once finalization has been tried, successful or not
    attempted: bool,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Write the header and leave the sink at the first sample slot
    pub fn create(mut writer: W) -> Result<Self, ContainerError> {
        let base = writer.stream_position()?;

        write_chunk_header(&mut writer, ChunkTag::FORM, 0)?;
        writer.write_all(ChunkTag::AIFF.as_bytes())?;

        write_chunk_header(&mut writer, ChunkTag::COMM, COMM_LEN)?;
        writer.write_all(&FormatDescriptor::recording(0).encode())?;

        write_chunk_header(&mut writer, ChunkTag::SSND, 0)?;
        writer.write_all(&[0u8; SSND_SUBHEADER_LEN as usize])?;

        Ok(Self {
            writer: Some(writer),
            base,
            samples_written: 0,
            finalized: None,
            attempted: false,
            encode_buffer: Vec::new(),
        })
    }

    /// Append samples big-endian to the SSND payload
    pub fn append(&mut self, samples: &[i32]) -> Result<(), ContainerError> {
        if self.finalized.is_some() {
            return Err(io::Error::new(io::ErrorKind::Other, "container already finalized").into());
        }
        let total = self.samples_written + samples.len() as u64;
        if total > MAX_SAMPLES {
            return Err(ContainerError::TooLarge { samples: total });
        }

        self.encode_buffer.clear();
        self.encode_buffer.reserve(samples.len() * BYTES_PER_SAMPLE as usize);
        for &s in samples {
            self.encode_buffer.put_i32(s);
        }

        let writer = sink(&mut self.writer)?;
        writer.write_all(&self.encode_buffer)?;
        self.samples_written = total;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    /// Patch the FORM length, sample count and SSND length.
    ///
    /// Only the first call touches the sink; later calls return the same result.
    pub fn finalize(&mut self) -> Result<Finalized, ContainerError> {
        if let Some(done) = self.finalized {
            return Ok(done);
        }
        self.attempted = true;

        let lengths = Finalized::for_samples(self.samples_written)?;
        let base = self.base;
        let writer = sink(&mut self.writer)?;
        patch_lengths(writer, base, &lengths)?;
        writer.seek(SeekFrom::Start(
            base + DATA_START + lengths.total_samples * BYTES_PER_SAMPLE,
        ))?;
        writer.flush()?;

        tracing::info!(
            "Finalized container: {} samples, FORM {} bytes, SSND {} bytes",
            lengths.total_samples,
            lengths.outer_length,
            lengths.data_chunk_length
        );
        self.finalized = Some(lengths);
        Ok(lengths)
    }

    /// Finalize and give back the sink
    pub fn into_inner(mut self) -> Result<W, ContainerError> {
        self.finalize()?;
        sink_owned(&mut self.writer)
    }
}

impl<W: Write + Seek> Drop for ContainerWriter<W> {
    fn drop(&mut self) {
        if !self.attempted && self.writer.is_some() {
            if let Err(e) = self.finalize() {
                tracing::error!("Failed to finalize container on drop: {}", e);
            }
        }
    }
}

fn sink<W>(writer: &mut Option<W>) -> Result<&mut W, ContainerError> {
    writer
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "container sink released").into())
}

fn sink_owned<W>(writer: &mut Option<W>) -> Result<W, ContainerError> {
    writer
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "container sink released").into())
}

fn patch_lengths<W: Write + Seek>(
    writer: &mut W,
    base: u64,
    lengths: &Finalized,
) -> Result<(), ContainerError> {
    writer.seek(SeekFrom::Start(base + OUTER_LENGTH_OFFSET))?;
    writer.write_all(&lengths.outer_length.to_be_bytes())?;

    writer.seek(SeekFrom::Start(base + SAMPLE_COUNT_OFFSET))?;
    writer.write_all(&(lengths.total_samples as i32).to_be_bytes())?;

    writer.seek(SeekFrom::Start(base + DATA_LENGTH_OFFSET))?;
    writer.write_all(&lengths.data_chunk_length.to_be_bytes())?;
    Ok(())
}

/// Patch the length fields of a recording that was never finalized.
///
/// The file must have the header layout [`ContainerWriter`] produces. The
/// sample count is derived from the file size; a trailing partial sample
/// is cut off.
pub fn repair(path: impl AsRef<Path>) -> Result<Finalized, ContainerError> {
    let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
    let len = file.metadata()?.len();
    if len < DATA_START {
        return Err(ContainerError::TruncatedInput {
            needed: DATA_START,
            available: len,
        });
    }

    let mut header = [0u8; DATA_START as usize];
    file.read_exact(&mut header)?;
    let expect = [
        (0usize, ChunkTag::FORM),
        (8, ChunkTag::AIFF),
        (12, ChunkTag::COMM),
        (38, ChunkTag::SSND),
    ];
    for (offset, expected) in expect {
        let mut found = [0u8; 4];
        found.copy_from_slice(&header[offset..offset + 4]);
        if ChunkTag(found) != expected {
            return Err(ContainerError::BadContainer {
                expected,
                found: ChunkTag(found),
            });
        }
    }

    let payload = len - DATA_START;
    let total_samples = payload / BYTES_PER_SAMPLE;
    if payload % BYTES_PER_SAMPLE != 0 {
        tracing::warn!(
            "Dropping {} trailing bytes of a partial sample",
            payload % BYTES_PER_SAMPLE
        );
        file.set_len(DATA_START + total_samples * BYTES_PER_SAMPLE)?;
    }

    let lengths = Finalized::for_samples(total_samples)?;
    patch_lengths(&mut file, 0, &lengths)?;
    file.sync_all()?;

    tracing::info!(
        "Repaired {}: {} samples",
        path.as_ref().display(),
        lengths.total_samples
    );
    Ok(lengths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decoder::read_container;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn be_u32(data: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
    }

    #[test]
    fn test_header_layout() {
        let writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
        let data = writer.into_inner().unwrap().into_inner();

        assert_eq!(data.len(), 54);
        assert_eq!(&data[0..4], b"FORM");
        assert_eq!(be_u32(&data, 4), 46);
        assert_eq!(&data[8..12], b"AIFF");
        assert_eq!(&data[12..16], b"COMM");
        assert_eq!(be_u32(&data, 16), 18);
        assert_eq!(&data[20..22], &[0, 1]);
        assert_eq!(be_u32(&data, 22), 0);
        assert_eq!(&data[26..28], &[0, 32]);
        assert_eq!(&data[28..38], &[0x40, 0x0e, 0xac, 0x44, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&data[38..42], b"SSND");
        assert_eq!(be_u32(&data, 42), 8);
        assert_eq!(&data[46..54], &[0; 8]);
    }

    #[test]
    fn test_placeholders_before_finalize() {
        let mut writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
        writer.append(&[1, 2, 3]).unwrap();

        let data = sink(&mut writer.writer).unwrap().get_ref().clone();
        assert_eq!(be_u32(&data, 4), 0);
        assert_eq!(be_u32(&data, 22), 0);
        assert_eq!(be_u32(&data, 42), 0);
        assert_eq!(&data[54..58], &[0, 0, 0, 1]);
    }

    #[test]
    fn test_finalize_192_samples() {
        let mut writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
        for _ in 0..3 {
            writer.append(&[7; 64]).unwrap();
        }
        let done = writer.finalize().unwrap();
        assert_eq!(
            done,
            Finalized {
                total_samples: 192,
                outer_length: 814,
                data_chunk_length: 776,
            }
        );

        let data = writer.into_inner().unwrap().into_inner();
        assert_eq!(data.len(), 54 + 768);
        assert_eq!(be_u32(&data, 4) as usize, data.len() - 8);
        assert_eq!(be_u32(&data, 22), 192);
        assert_eq!(be_u32(&data, 42), 776);
    }

    #[test]
    fn test_finalize_runs_once() {
        let mut writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
        writer.append(&[1]).unwrap();
        let first = writer.finalize().unwrap();
        assert!(writer.append(&[2]).is_err());
        assert_eq!(writer.finalize().unwrap(), first);
    }

    #[test]
    fn test_drop_finalizes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.aiff");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut writer = ContainerWriter::create(io::BufWriter::new(file)).unwrap();
            writer.append(&[1, 2, 3, 4]).unwrap();
        }
        let data = std::fs::read(&path).unwrap();
        assert_eq!(be_u32(&data, 22), 4);
        assert_eq!(be_u32(&data, 42), 24);
    }

    #[test]
    fn test_too_large() {
        assert!(Finalized::for_samples(MAX_SAMPLES).is_ok());
        assert!(matches!(
            Finalized::for_samples(MAX_SAMPLES + 1),
            Err(ContainerError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_repair_unfinalized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crashed.aiff");

        let mut writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
        writer.append(&[5, 6, 7]).unwrap();
        let mut data = sink(&mut writer.writer).unwrap().get_ref().clone();
        data.extend_from_slice(&[0xff, 0xff]);
        std::fs::write(&path, &data).unwrap();

        let done = repair(&path).unwrap();
        assert_eq!(done.total_samples, 3);

        let (format, mut source) = crate::codec::open_container(&path).unwrap().into_parts();
        assert_eq!(format.sample_count, 3);
        let mut out = [0i32; 4];
        assert_eq!(source.read_samples(&mut out).unwrap(), 3);
        assert_eq!(&out[..3], &[5, 6, 7]);
    }

    #[test]
    fn test_repair_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.wav");
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(matches!(
            repair(&path),
            Err(ContainerError::BadContainer { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_write_then_read(blocks in prop::collection::vec(
            prop::collection::vec(any::<i32>(), 0..80), 0..8)
        ) {
            let mut writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
            for block in &blocks {
                writer.append(block).unwrap();
            }
            let total: usize = blocks.iter().map(Vec::len).sum();
            let done = writer.finalize().unwrap();
            prop_assert_eq!(done.outer_length as usize, 4 + 8 + 18 + 8 + 8 + 4 * total);
            prop_assert_eq!(done.data_chunk_length as usize, 4 * total + 8);

            let data = writer.into_inner().unwrap();
            let (format, mut source) = read_container(data).unwrap().into_parts();
            prop_assert_eq!(format.sample_count as usize, total);

            let mut out = vec![0i32; total];
            prop_assert_eq!(source.read_samples(&mut out).unwrap(), total);
            let expected: Vec<i32> = blocks.concat();
            prop_assert_eq!(out, expected);
        }
    }
}

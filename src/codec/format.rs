//! AIFF identifiers, the COMM payload and the fixed output layout
//!
//! Everything on disk is big-endian. The output file this crate writes
//! always has the same 54-byte header:
//!
//! ```text
//! 0   "FORM"   4  outer length (patched)   8  "AIFF"
//! 12  "COMM"   16 18   20 channels   22 sample count (patched)
//! 26  bits     28 80-bit sample rate
//! 38  "SSND"   42 data length (patched)   46 offset   50 block size
//! 54  int32 samples...
//! ```

use bytes::{Buf, BufMut};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::ContainerError;

/// Four-byte chunk identifier, compared byte for byte
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkTag(pub [u8; 4]);

impl ChunkTag {
    pub const FORM: ChunkTag = ChunkTag(*b"FORM");
    pub const AIFF: ChunkTag = ChunkTag(*b"AIFF");
    pub const COMM: ChunkTag = ChunkTag(*b"COMM");
    pub const SSND: ChunkTag = ChunkTag(*b"SSND");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<[u8; 4]> for ChunkTag {
    fn from(bytes: [u8; 4]) -> Self {
        ChunkTag(bytes)
    }
}

impl fmt::Display for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for ChunkTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkTag({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for ChunkTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Size of a chunk header (tag + length)
pub const CHUNK_HEADER_LEN: u64 = 8;

/// Size of the COMM payload we read and write
pub const COMM_LEN: u32 = 18;

/// Offset/block-size fields at the start of the SSND payload
pub const SSND_SUBHEADER_LEN: u32 = 8;

/// Bytes per stored sample (32-bit PCM)
pub const BYTES_PER_SAMPLE: u64 = 4;

/// Byte offset of the FORM length field
pub const OUTER_LENGTH_OFFSET: u64 = 4;

/// Byte offset of the COMM sample-count field
pub const SAMPLE_COUNT_OFFSET: u64 = 22;

/// Byte offset of the SSND length field
pub const DATA_LENGTH_OFFSET: u64 = 42;

/// Byte offset of the first sample in a file we wrote
pub const DATA_START: u64 = 54;

/// FORM payload size with zero samples: form type, COMM, SSND header and sub-header
pub const FIXED_OUTER_LEN: u64 = 4 + 8 + COMM_LEN as u64 + 8 + SSND_SUBHEADER_LEN as u64;

/// Largest sample count whose FORM length still fits in 32 bits
pub const MAX_SAMPLES: u64 = (u32::MAX as u64 - FIXED_OUTER_LEN) / BYTES_PER_SAMPLE;

/// FORM length for a file holding `total_samples` samples
pub fn outer_length(total_samples: u64) -> Option<u32> {
    let len = FIXED_OUTER_LEN.checked_add(total_samples.checked_mul(BYTES_PER_SAMPLE)?)?;
    u32::try_from(len).ok()
}

/// SSND length for a file holding `total_samples` samples
pub fn data_chunk_length(total_samples: u64) -> Option<u32> {
    let len = total_samples
        .checked_mul(BYTES_PER_SAMPLE)?
        .checked_add(SSND_SUBHEADER_LEN as u64)?;
    u32::try_from(len).ok()
}

/// 80-bit IEEE extended sample rate, carried verbatim
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ExtendedRate(pub [u8; 10]);

impl ExtendedRate {
    /// 44100 Hz
    pub const HZ_44100: ExtendedRate = ExtendedRate([0x40, 0x0e, 0xac, 0x44, 0, 0, 0, 0, 0, 0]);

    /// Decode to Hz for display. `None` for infinities and NaNs.
    pub fn to_hz(&self) -> Option<f64> {
        let mut buf = &self.0[..];
        let sign_exp = buf.get_u16();
        let mantissa = buf.get_u64();

        let exponent = (sign_exp & 0x7fff) as i32;
        if exponent == 0x7fff {
            return None;
        }
        if mantissa == 0 {
            return Some(0.0);
        }

        let magnitude = mantissa as f64 * 2f64.powi(exponent - 16383 - 63);
        Some(if sign_exp & 0x8000 != 0 { -magnitude } else { magnitude })
    }
}

impl fmt::Debug for ExtendedRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_hz() {
            Some(hz) => write!(f, "ExtendedRate({} Hz)", hz),
            None => write!(f, "ExtendedRate({:02x?})", self.0),
        }
    }
}

impl Serialize for ExtendedRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_hz() {
            Some(hz) => serializer.serialize_f64(hz),
            None => serializer.serialize_none(),
        }
    }
}

/// COMM chunk payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    pub channels: i16,
    /// Frames in the recording
    pub sample_count: i32,
    pub bits_per_sample: i16,
    pub sample_rate: ExtendedRate,
}

impl FormatDescriptor {
    /// Mono 32-bit 44.1 kHz, the only layout this crate records
    pub fn recording(sample_count: i32) -> Self {
        Self {
            channels: 1,
            sample_count,
            bits_per_sample: 32,
            sample_rate: ExtendedRate::HZ_44100,
        }
    }

    /// Decode from the first 18 bytes of a COMM payload
    pub fn decode(payload: &[u8]) -> Result<Self, ContainerError> {
        if payload.len() < COMM_LEN as usize {
            return Err(ContainerError::TruncatedInput {
                needed: COMM_LEN as u64,
                available: payload.len() as u64,
            });
        }

        let mut buf = payload;
        let channels = buf.get_i16();
        let sample_count = buf.get_i32();
        let bits_per_sample = buf.get_i16();
        let mut rate = [0u8; 10];
        buf.copy_to_slice(&mut rate);

        Ok(Self {
            channels,
            sample_count,
            bits_per_sample,
            sample_rate: ExtendedRate(rate),
        })
    }

    pub fn encode(&self) -> [u8; COMM_LEN as usize] {
        let mut out = [0u8; COMM_LEN as usize];
        let mut buf = &mut out[..];
        buf.put_i16(self.channels);
        buf.put_i32(self.sample_count);
        buf.put_i16(self.bits_per_sample);
        buf.put_slice(&self.sample_rate.0);
        out
    }

    /// Whether samples can be streamed as-is (mono, 32-bit)
    pub fn is_mono_int32(&self) -> bool {
        self.channels == 1 && self.bits_per_sample == 32
    }

    pub fn sample_rate_hz(&self) -> Option<f64> {
        self.sample_rate.to_hz()
    }

    /// COMM frame count, with a negative count read as zero
    pub fn declared_samples(&self) -> u64 {
        self.sample_count.max(0) as u64
    }
}

//! AIFF container codec
//!
//! Chunk framing, the container reader that feeds playback and the
//! container writer that records capture.

pub mod chunk;
pub mod decoder;
pub mod encoder;
pub mod format;

pub use chunk::{write_chunk_header, Chunk, ChunkHeader, ChunkScanner, Section};
pub use decoder::{open_container, read_container, Container, SampleSource};
pub use encoder::{repair, ContainerWriter, Finalized};
pub use format::{ChunkTag, ExtendedRate, FormatDescriptor};

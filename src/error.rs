//! Error types for the duplex recorder

use thiserror::Error;

use crate::codec::ChunkTag;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Container (AIFF) framing and layout errors
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Bad container: expected '{expected}', found '{found}'")]
    BadContainer { expected: ChunkTag, found: ChunkTag },

    #[error("Missing required chunk '{0}'")]
    MissingChunk(ChunkTag),

    #[error("Truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: u64, available: u64 },

    #[error("Too many samples for a 32-bit container: {samples}")]
    TooLarge { samples: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio transport errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid stream state: {0}")]
    InvalidState(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(e: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(e.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(e: cpal::PlayStreamError) -> Self {
        AudioError::CpalError(e.to_string())
    }
}

impl From<cpal::PauseStreamError> for AudioError {
    fn from(e: cpal::PauseStreamError) -> Self {
        AudioError::CpalError(e.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(e: cpal::DefaultStreamConfigError) -> Self {
        AudioError::UnsupportedFormat(e.to_string())
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

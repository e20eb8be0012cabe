//! # AIFF Duplex
//!
//! Simultaneous playback and recording through one full-duplex audio
//! stream. Samples are read from an AIFF file and played while the
//! captured input is written to a new AIFF file.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐                                      ┌──────────────┐
//! │  input.aiff  │                                      │ output.aiff  │
//! └──────┬───────┘                                      └──────▲───────┘
//!        │ codec::read_container                               │ codec::ContainerWriter
//!        ▼                                                     │ (lengths patched at finalize)
//! ┌──────────────┐      ┌──────────────────────────┐    ┌──────┴───────┐
//! │ SampleSource ├─────►│   engine::DuplexEngine   ├───►│  SSND append │
//! └──────────────┘      │  capture first, then     │    └──────────────┘
//!                       │  fill playback block     │
//!                       └────────▲────────┬────────┘
//!                       captured │        │ playback
//!                       ┌────────┴────────▼────────┐
//!                       │   audio::AudioTransport  │
//!                       │  cpal (device) / offline │
//!                       └──────────────────────────┘
//!
//!   session::run  creates the output, parses the input, starts the
//!   stream, waits for a stop condition and finalizes exactly once.
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Stream and container sample rate
    pub const SAMPLE_RATE: u32 = 44100;

    /// Mono in both directions
    pub const CHANNELS: u16 = 1;

    /// Frames per callback period
    pub const DEFAULT_FRAMES_PER_BUFFER: u32 = 64;

    /// Lock-free ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    /// Seconds between progress logs while a session runs
    pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;

    /// How long to wait for the engine to report finalization after close
    pub const FINALIZE_TIMEOUT_MS: u64 = 5000;
}

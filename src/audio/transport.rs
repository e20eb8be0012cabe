//! Audio transport contract
//!
//! A transport delivers a block of captured samples and a block to fill
//! for playback at a fixed cadence. The duplex engine only ever sees
//! this interface, so it can be driven by real hardware or by a script.

use crossbeam_channel::Receiver;

use crate::constants::{CHANNELS, DEFAULT_FRAMES_PER_BUFFER, SAMPLE_RATE};
use crate::error::AudioError;

/// Requested stream shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub input_channels: u16,
    pub output_channels: u16,
    pub sample_rate: u32,
    pub frames_per_buffer: u32,
}

impl StreamConfig {
    pub fn with_frames(frames_per_buffer: u32) -> Self {
        Self {
            frames_per_buffer,
            ..Self::default()
        }
    }

    /// Callback period in microseconds
    pub fn period_us(&self) -> u64 {
        self.frames_per_buffer as u64 * 1_000_000 / self.sample_rate as u64
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            input_channels: CHANNELS,
            output_channels: CHANNELS,
            sample_rate: SAMPLE_RATE,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
        }
    }
}

/// Called once per hardware period with the captured block and the
/// playback block to fill. The playback block arrives zero-filled.
pub type DuplexCallback = Box<dyn FnMut(&[i32], &mut [i32]) + Send + 'static>;

/// Something that can open duplex streams
pub trait AudioTransport {
    type Stream: DuplexStream;

    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: DuplexCallback,
    ) -> Result<Self::Stream, AudioError>;
}

/// An open duplex stream
pub trait DuplexStream {
    fn start(&mut self) -> Result<(), AudioError>;

    /// No callback runs after this returns
    fn stop(&mut self) -> Result<(), AudioError>;

    /// Release the stream; the callback is dropped before this returns
    fn close(self) -> Result<(), AudioError>;

    /// Runtime errors reported by the device after start
    fn faults(&self) -> Option<Receiver<AudioError>> {
        None
    }

    /// Captured blocks lost because the capture queue was full
    fn dropped_frames(&self) -> usize {
        0
    }
}

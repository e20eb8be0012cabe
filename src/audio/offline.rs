//! Scripted transport with no audio hardware
//!
//! Replays a fixed list of capture blocks through the duplex callback on
//! a worker thread and records every playback block it gets back. Used
//! by the session tests and the engine benchmark.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::transport::{AudioTransport, DuplexCallback, DuplexStream, StreamConfig};
use crate::error::AudioError;

/// Playback blocks in callback order
pub type PlaybackLog = Arc<Mutex<Vec<Vec<i32>>>>;

pub struct OfflineTransport {
    script: Vec<Vec<i32>>,
    played: PlaybackLog,
}

impl OfflineTransport {
    /// One callback per entry in `script`
    pub fn new(script: Vec<Vec<i32>>) -> Self {
        Self {
            script,
            played: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `callbacks` blocks of `frames` samples each, counting up from 0
    pub fn ramp(frames: usize, callbacks: usize) -> Self {
        let script = (0..callbacks)
            .map(|c| (0..frames).map(|i| (c * frames + i) as i32).collect())
            .collect();
        Self::new(script)
    }

    pub fn playback_log(&self) -> PlaybackLog {
        self.played.clone()
    }
}

impl AudioTransport for OfflineTransport {
    type Stream = OfflineStream;

    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: DuplexCallback,
    ) -> Result<OfflineStream, AudioError> {
        if config.frames_per_buffer == 0 {
            return Err(AudioError::StreamError("zero frames per buffer".to_string()));
        }
        Ok(OfflineStream {
            callback: Some(callback),
            script: self.script.clone(),
            frames: (config.frames_per_buffer * config.output_channels as u32) as usize,
            played: self.played.clone(),
            worker: None,
        })
    }
}

pub struct OfflineStream {
    callback: Option<DuplexCallback>,
    script: Vec<Vec<i32>>,
    frames: usize,
    played: PlaybackLog,
    worker: Option<JoinHandle<DuplexCallback>>,
}

impl DuplexStream for OfflineStream {
    fn start(&mut self) -> Result<(), AudioError> {
        let mut callback = self
            .callback
            .take()
            .ok_or_else(|| AudioError::InvalidState("stream already started".to_string()))?;
        let script = std::mem::take(&mut self.script);
        let frames = self.frames;
        let played = self.played.clone();

        let handle = thread::Builder::new()
            .name("offline-stream".to_string())
            .spawn(move || {
                for captured in &script {
                    let mut out = vec![0; frames];
                    callback(captured, &mut out);
                    played.lock().push(out);
                }
                callback
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Waits for the script to finish
    fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(handle) = self.worker.take() {
            let callback = handle
                .join()
                .map_err(|_| AudioError::StreamError("offline callback panicked".to_string()))?;
            self.callback = Some(callback);
        }
        Ok(())
    }

    fn close(mut self) -> Result<(), AudioError> {
        self.stop()?;
        drop(self.callback.take());
        Ok(())
    }
}

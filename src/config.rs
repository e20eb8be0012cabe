//! Configuration file handling
//!
//! Settings live in a TOML document. Every field has a default, so an
//! empty or partial file is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_FRAMES_PER_BUFFER, DEFAULT_STATS_INTERVAL_SECS, RING_BUFFER_CAPACITY};
use crate::error::{Error, Result};

/// Largest accepted frames-per-buffer value
pub const MAX_FRAMES_PER_BUFFER: u32 = 8192;

/// Longest accepted session limit (one week)
pub const MAX_DURATION_SECS: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// cpal input device name, host default when unset
    pub input_device: Option<String>,
    /// cpal output device name, host default when unset
    pub output_device: Option<String>,
    pub frames_per_buffer: u32,
    /// Capture queue capacity in blocks
    pub capture_queue_frames: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            capture_queue_frames: RING_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub stop_when_played: bool,
    pub max_duration_secs: Option<f64>,
    /// 0 disables the periodic progress log
    pub stats_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stop_when_played: false,
            max_duration_secs: None,
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the per-user config file, or defaults.
    ///
    /// An explicit path must exist; the per-user file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (default_path(), false),
        };
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !required && !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let frames = self.stream.frames_per_buffer;
        if frames == 0 || frames > MAX_FRAMES_PER_BUFFER {
            return Err(Error::Config(format!(
                "frames_per_buffer must be in 1..={}, got {}",
                MAX_FRAMES_PER_BUFFER, frames
            )));
        }
        if self.stream.capture_queue_frames == 0 {
            return Err(Error::Config("capture_queue_frames must be positive".to_string()));
        }
        if let Some(secs) = self.session.max_duration_secs {
            if !secs.is_finite() || !(0.0..=MAX_DURATION_SECS).contains(&secs) {
                return Err(Error::Config(format!(
                    "max_duration_secs must be in 0..={}, got {}",
                    MAX_DURATION_SECS, secs
                )));
            }
        }
        Ok(())
    }
}

/// `config.toml` in the per-user config directory
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "aiff-duplex").map(|dirs| dirs.config_dir().join("config.toml"))
}

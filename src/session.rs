//! Session lifecycle
//!
//! Creates the output, parses the input, streams until a stop condition
//! and makes sure the output is finalized exactly once. The engine is
//! moved into the transport callback; closing the stream drops it, and
//! its drop finalizes the container and reports back here.

use chrono::{DateTime, Utc};
use crossbeam_channel::{after, bounded, never, select, tick, Receiver};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::audio::{AudioTransport, DuplexCallback, DuplexStream, StreamConfig};
use crate::codec::{open_container, ContainerWriter, Finalized, FormatDescriptor};
use crate::config::AppConfig;
use crate::constants::FINALIZE_TIMEOUT_MS;
use crate::engine::{DuplexEngine, EngineEvent};
use crate::error::{AudioError, Error, Result};

/// Everything a session needs to run
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub stream: StreamConfig,
    pub max_duration: Option<Duration>,
    pub stop_when_played: bool,
    pub stats_interval: Option<Duration>,
}

impl SessionOptions {
    /// Both paths get an `.aiff` suffix when they lack one
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: normalize_path(input),
            output: normalize_path(output),
            stream: StreamConfig::default(),
            max_duration: None,
            stop_when_played: false,
            stats_interval: None,
        }
    }

    pub fn from_config(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        config: &AppConfig,
    ) -> Result<Self> {
        config.validate()?;
        let session = &config.session;
        let max_duration = session
            .max_duration_secs
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(|e| Error::Config(format!("max_duration_secs: {}", e)))?;
        Ok(Self {
            stream: StreamConfig::with_frames(config.stream.frames_per_buffer),
            max_duration,
            stop_when_played: session.stop_when_played,
            stats_interval: (session.stats_interval_secs > 0)
                .then(|| Duration::from_secs(session.stats_interval_secs)),
            ..Self::new(input, output)
        })
    }
}

/// Append `.aiff` unless the name already ends with it
pub fn normalize_path(path: impl Into<PathBuf>) -> PathBuf {
    let path = path.into();
    if path.as_os_str().to_string_lossy().ends_with(".aiff") {
        return path;
    }
    let mut name = path.into_os_string();
    name.push(".aiff");
    PathBuf::from(name)
}

/// Why streaming ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Interrupt or explicit shutdown request
    Shutdown,
    /// `max_duration` elapsed
    Deadline,
    /// Source exhausted with `stop_when_played` set
    PlaybackFinished,
    /// The output reached the 32-bit size limit
    CaptureLimit,
    /// The engine or the device reported an error
    Fault,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub source_format: FormatDescriptor,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub stop_reason: StopReason,
    pub samples_captured: u64,
    pub samples_played: u64,
    pub dropped_frames: usize,
    pub finalized: Finalized,
    pub fault: Option<String>,
}

impl SessionReport {
    pub fn is_fault(&self) -> bool {
        self.stop_reason == StopReason::Fault
    }

    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// What woke the control thread
enum Wake {
    Stop(StopReason),
    Fault(String),
    Progress,
    PlaybackFinished(u64),
    FaultsClosed,
}

/// Run one playback-and-record session on `transport`.
///
/// Returns when `shutdown` fires or its sender is dropped, when the
/// deadline passes, or when the engine or device stops the session.
pub fn run<T: AudioTransport>(
    transport: &T,
    options: &SessionOptions,
    shutdown: &Receiver<()>,
) -> Result<SessionReport> {
    // The output exists before the input is looked at; a bad input leaves it empty
    let output = File::create(&options.output)?;
    let container = open_container(&options.input)?;
    let (format, source) = container.into_parts();
    tracing::info!(
        "Playing {} ({} samples), recording to {}",
        options.input.display(),
        format.sample_count,
        options.output.display()
    );

    let writer = ContainerWriter::create(BufWriter::new(output))?;
    let (event_tx, events) = bounded(16);
    let (done_tx, done_rx) = bounded(1);
    let mut engine = DuplexEngine::new(writer, source, format.sample_count)
        .with_events(event_tx)
        .with_completion(done_tx);
    let stats = engine.stats();

    let callback: DuplexCallback = Box::new(move |input: &[i32], output: &mut [i32]| {
        engine.on_callback(input, output);
    });
    let mut stream = transport.open_stream(&options.stream, callback)?;

    let started_at = Utc::now();
    let started = Instant::now();
    if let Err(e) = stream.start() {
        if let Err(close_err) = stream.close() {
            tracing::warn!("Failed to close stream after start failure: {}", close_err);
        }
        return Err(e.into());
    }
    tracing::info!("Stream started");

    let mut faults = stream.faults().unwrap_or_else(never);
    let deadline = options.max_duration.map(after).unwrap_or_else(never);
    let ticker = options.stats_interval.map(tick).unwrap_or_else(never);
    let mut fault = None;

    let stop_reason = loop {
        let wake = select! {
            recv(shutdown) -> _ => Wake::Stop(StopReason::Shutdown),
            recv(deadline) -> _ => Wake::Stop(StopReason::Deadline),
            recv(events) -> event => match event {
                Ok(EngineEvent::PlaybackFinished { played }) => Wake::PlaybackFinished(played),
                Ok(EngineEvent::CaptureLimitReached { captured }) => {
                    tracing::warn!("Output full after {} samples", captured);
                    Wake::Stop(StopReason::CaptureLimit)
                }
                Ok(EngineEvent::Fault(e)) => Wake::Fault(e.to_string()),
                Err(_) => Wake::Fault("engine released before stop".to_string()),
            },
            recv(faults) -> err => match err {
                Ok(e) => Wake::Fault(e.to_string()),
                Err(_) => Wake::FaultsClosed,
            },
            recv(ticker) -> _ => Wake::Progress,
        };

        match wake {
            Wake::Stop(reason) => break reason,
            Wake::Fault(message) => {
                tracing::error!("Session fault: {}", message);
                fault = Some(message);
                break StopReason::Fault;
            }
            Wake::PlaybackFinished(played) => {
                tracing::info!("Playback finished after {} samples", played);
                if options.stop_when_played {
                    break StopReason::PlaybackFinished;
                }
            }
            Wake::Progress => {
                tracing::info!(
                    "{:.1}s: captured {}, played {}, dropped blocks {}",
                    started.elapsed().as_secs_f64(),
                    stats.samples_captured(),
                    stats.samples_played(),
                    stream.dropped_frames()
                );
            }
            Wake::FaultsClosed => faults = never(),
        }
    };
    tracing::info!("Stopping stream: {:?}", stop_reason);

    if let Err(e) = stream.stop() {
        tracing::warn!("Failed to stop stream: {}", e);
    }
    let dropped_frames = stream.dropped_frames();
    if dropped_frames > 0 {
        tracing::warn!("{} captured blocks were dropped", dropped_frames);
    }
    if let Err(e) = stream.close() {
        tracing::warn!("Failed to close stream: {}", e);
    }

    let finalized = match done_rx.recv_timeout(Duration::from_millis(FINALIZE_TIMEOUT_MS)) {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::Audio(AudioError::InvalidState(
                "engine did not report finalization".to_string(),
            )))
        }
    };

    Ok(SessionReport {
        input: options.input.clone(),
        output: options.output.clone(),
        source_format: format,
        started_at,
        ended_at: Utc::now(),
        stop_reason,
        samples_captured: stats.samples_captured(),
        samples_played: stats.samples_played(),
        dropped_frames,
        finalized,
        fault,
    })
}

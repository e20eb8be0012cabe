//! Duplex streaming engine
//!
//! Runs once per audio period on the transport's callback thread:
//! appends the captured block to the output container, then fills the
//! playback block from the input container until the source runs out.
//! Capture carries on after playback ends.
//!
//! The engine owns the output container, the sample source and both
//! running counters. Nothing else touches them while it streams, so no
//! locking is involved. The control thread observes progress through
//! [`EngineStats`] and [`EngineEvent`]s.

use crossbeam_channel::Sender;
use std::io::{Read, Seek, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::format::MAX_SAMPLES;
use crate::codec::{ContainerWriter, Finalized, SampleSource};
use crate::error::{AudioError, ContainerError, Error, Result};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Streaming,
    Stopped,
}

/// Notifications sent to the control thread
#[derive(Debug)]
pub enum EngineEvent {
    /// The source is exhausted; capture continues
    PlaybackFinished { played: u64 },
    /// The output container is full; further capture is discarded
    CaptureLimitReached { captured: u64 },
    /// Unrecoverable error; the engine has stopped
    Fault(Error),
}

/// Counters readable from any thread
#[derive(Debug, Default)]
pub struct EngineStats {
    captured: AtomicU64,
    played: AtomicU64,
    callbacks: AtomicU64,
}

impl EngineStats {
    pub fn samples_captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    pub fn samples_played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }
}

/// What one callback did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cycle {
    pub captured: usize,
    pub played: usize,
}

pub struct DuplexEngine<W: Write + Seek, R: Read + Seek> {
    writer: Option<ContainerWriter<W>>,
    source: SampleSource<R>,
    /// Samples still to be played
    remaining: u64,
    /// Samples appended to the output
    captured: u64,
    state: EngineState,
    playback_finished: bool,
    limit_reached: bool,
    stats: Arc<EngineStats>,
    events: Option<Sender<EngineEvent>>,
    completion: Option<Sender<std::result::Result<Finalized, ContainerError>>>,
}

impl<W: Write + Seek, R: Read + Seek> DuplexEngine<W, R> {
    /// `sample_count` is the COMM frame count of the source
    pub fn new(writer: ContainerWriter<W>, source: SampleSource<R>, sample_count: i32) -> Self {
        Self {
            writer: Some(writer),
            source,
            remaining: sample_count.max(0) as u64,
            captured: 0,
            state: EngineState::Streaming,
            playback_finished: false,
            limit_reached: false,
            stats: Arc::new(EngineStats::default()),
            events: None,
            completion: None,
        }
    }

    /// Send lifecycle events to `events`
    pub fn with_events(mut self, events: Sender<EngineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Report the finalization outcome to `completion` when the engine is dropped
    pub fn with_completion(
        mut self,
        completion: Sender<std::result::Result<Finalized, ContainerError>>,
    ) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn remaining_playback(&self) -> u64 {
        self.remaining
    }

    pub fn samples_captured(&self) -> u64 {
        self.captured
    }

    /// Handle one audio period.
    ///
    /// Slots of `output` past [`Cycle::played`] are left as they were.
    /// After an error the engine is stopped and ignores further calls.
    pub fn process(&mut self, input: &[i32], output: &mut [i32]) -> Result<Cycle> {
        if self.state == EngineState::Stopped {
            return Ok(Cycle::default());
        }
        match self.cycle(input, output) {
            Ok(cycle) => Ok(cycle),
            Err(e) => {
                self.state = EngineState::Stopped;
                Err(e)
            }
        }
    }

    /// Callback entry point: like [`process`](Self::process), but errors
    /// are reported as [`EngineEvent::Fault`].
    pub fn on_callback(&mut self, input: &[i32], output: &mut [i32]) {
        if let Err(e) = self.process(input, output) {
            self.notify(EngineEvent::Fault(e));
        }
    }

    fn cycle(&mut self, input: &[i32], output: &mut [i32]) -> Result<Cycle> {
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);

        let room = MAX_SAMPLES - self.captured;
        let take = (input.len() as u64).min(room) as usize;
        if take > 0 {
            let writer = self
                .writer
                .as_mut()
                .ok_or_else(|| AudioError::InvalidState("output already finalized".to_string()))?;
            writer.append(&input[..take])?;
            self.captured += take as u64;
            self.stats.captured.fetch_add(take as u64, Ordering::Relaxed);
        }
        if take < input.len() && !self.limit_reached {
            self.limit_reached = true;
            self.notify(EngineEvent::CaptureLimitReached {
                captured: self.captured,
            });
        }

        let want = (output.len() as u64).min(self.remaining) as usize;
        let mut played = 0;
        if want > 0 {
            played = self.source.read_samples(&mut output[..want])?;
            self.stats.played.fetch_add(played as u64, Ordering::Relaxed);
            self.remaining = if played < want {
                // The data chunk is shorter than COMM claims
                0
            } else {
                self.remaining - played as u64
            };
        }
        if self.remaining == 0 && !self.playback_finished {
            self.playback_finished = true;
            self.notify(EngineEvent::PlaybackFinished {
                played: self.stats.samples_played(),
            });
        }

        Ok(Cycle {
            captured: take,
            played,
        })
    }

    fn notify(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            let _ = events.try_send(event);
        }
    }

    /// Finalize the output now and hand back its sink
    pub fn finish(mut self) -> Result<(Finalized, W)> {
        self.state = EngineState::Stopped;
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| AudioError::InvalidState("output already finalized".to_string()))?;
        let result = writer.finalize();
        if let Some(completion) = self.completion.take() {
            let report: std::result::Result<Finalized, ContainerError> = match &result {
                Ok(done) => Ok(*done),
                Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()).into()),
            };
            let _ = completion.try_send(report);
        }
        let done = result?;
        Ok((done, writer.into_inner()?))
    }
}

impl<W: Write + Seek, R: Read + Seek> Drop for DuplexEngine<W, R> {
    fn drop(&mut self) {
        self.state = EngineState::Stopped;
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        let result = writer.finalize();
        match self.completion.take() {
            Some(completion) => {
                let _ = completion.try_send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::error!("Failed to finalize output: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_container;
    use bytes::BufMut;
    use crossbeam_channel::{bounded, Receiver};
    use proptest::prelude::*;
    use std::io::Cursor;

    type TestEngine = DuplexEngine<Cursor<Vec<u8>>, Cursor<Vec<u8>>>;

    /// Source container holding `samples`, with COMM claiming `declared` frames
    fn source_with(samples: &[i32], declared: i32) -> SampleSource<Cursor<Vec<u8>>> {
        let mut writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
        writer.append(samples).unwrap();
        let mut data = writer.into_inner().unwrap().into_inner();
        data[22..26].copy_from_slice(&declared.to_be_bytes());
        read_container(Cursor::new(data)).unwrap().source
    }

    fn engine(samples: &[i32]) -> (TestEngine, Receiver<EngineEvent>) {
        let source = source_with(samples, samples.len() as i32);
        let writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
        let (tx, rx) = bounded(16);
        let engine = DuplexEngine::new(writer, source, samples.len() as i32).with_events(tx);
        (engine, rx)
    }

    fn recorded(engine: TestEngine) -> (Finalized, Vec<i32>) {
        let (done, sink) = engine.finish().unwrap();
        let (format, mut source) = read_container(sink).unwrap().into_parts();
        assert_eq!(format.sample_count as u64, done.total_samples);
        let mut out = vec![0; done.total_samples as usize];
        source.read_samples(&mut out).unwrap();
        (done, out)
    }

    #[test]
    fn test_capture_and_playback() {
        let (mut engine, _events) = engine(&[10, 20, 30, 40]);

        let mut out = [0; 3];
        let cycle = engine.process(&[1, 2, 3], &mut out).unwrap();
        assert_eq!(cycle, Cycle { captured: 3, played: 3 });
        assert_eq!(out, [10, 20, 30]);
        assert_eq!(engine.remaining_playback(), 1);

        let (_, samples) = recorded(engine);
        assert_eq!(samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_exhaustion_leaves_tail_untouched() {
        let (mut engine, events) = engine(&[10, 20, 30, 40, 50]);

        let mut out = [-1; 3];
        engine.process(&[0; 3], &mut out).unwrap();
        let mut out = [-1; 3];
        let cycle = engine.process(&[0; 3], &mut out).unwrap();
        assert_eq!(cycle.played, 2);
        assert_eq!(out, [40, 50, -1]);

        assert!(matches!(
            events.try_recv().unwrap(),
            EngineEvent::PlaybackFinished { played: 5 }
        ));

        let mut out = [-1; 3];
        let cycle = engine.process(&[7; 3], &mut out).unwrap();
        assert_eq!(cycle, Cycle { captured: 3, played: 0 });
        assert_eq!(out, [-1; 3]);
        assert!(events.try_recv().is_err());
        assert_eq!(engine.samples_captured(), 9);
    }

    #[test]
    fn test_scenario_128_source_three_callbacks() {
        let source: Vec<i32> = (0..128).collect();
        let (mut engine, _events) = engine(&source);
        let stats = engine.stats();

        let mut played = Vec::new();
        for c in 0..3 {
            let mut out = [0; 64];
            let cycle = engine.process(&[c; 64], &mut out).unwrap();
            played.extend_from_slice(&out[..cycle.played]);
            let expected_played = if c < 2 { 64 } else { 0 };
            assert_eq!(cycle.played, expected_played);
        }
        assert_eq!(played, source);
        assert_eq!(engine.remaining_playback(), 0);
        assert_eq!(stats.samples_captured(), 192);
        assert_eq!(stats.callbacks(), 3);

        let (done, _) = recorded(engine);
        assert_eq!(done.total_samples, 192);
        assert_eq!(done.data_chunk_length, 776);
        assert_eq!(done.outer_length, 814);
    }

    #[test]
    fn test_short_data_chunk_ends_playback() {
        let source = source_with(&[1, 2], 10);
        let writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
        let mut engine = DuplexEngine::new(writer, source, 10);

        let mut out = [0; 4];
        let cycle = engine.process(&[], &mut out).unwrap();
        assert_eq!(cycle.played, 2);
        assert_eq!(engine.remaining_playback(), 0);

        let cycle = engine.process(&[5], &mut out).unwrap();
        assert_eq!(cycle, Cycle { captured: 1, played: 0 });
    }

    #[test]
    fn test_empty_source_is_capture_only() {
        let (mut engine, events) = engine(&[]);
        let mut out = [3; 4];
        let cycle = engine.process(&[1, 1, 1, 1], &mut out).unwrap();
        assert_eq!(cycle, Cycle { captured: 4, played: 0 });
        assert_eq!(out, [3; 4]);
        assert!(matches!(
            events.try_recv().unwrap(),
            EngineEvent::PlaybackFinished { played: 0 }
        ));
    }

    /// Sink that refuses writes once `fail` is set
    struct FailingSink {
        inner: Cursor<Vec<u8>>,
        fail: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FailingSink {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_write_failure_stops_engine() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let sink = FailingSink {
            inner: Cursor::new(Vec::new()),
            fail: fail.clone(),
        };
        let writer = ContainerWriter::create(sink).unwrap();
        fail.store(true, Ordering::SeqCst);

        let (tx, rx) = bounded(4);
        let (done_tx, done_rx) = bounded(1);
        let mut engine = DuplexEngine::new(writer, source_with(&[1], 1), 1)
            .with_events(tx)
            .with_completion(done_tx);

        let mut out = [0; 1];
        engine.on_callback(&[1], &mut out);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Fault(_)));

        // Stopped engines ignore further periods
        let cycle = engine.process(&[1], &mut out).unwrap();
        assert_eq!(cycle, Cycle::default());

        drop(engine);
        assert!(done_rx.try_recv().unwrap().is_err());
    }

    #[test]
    fn test_drop_reports_completion() {
        let (tx, rx) = bounded(1);
        {
            let source = source_with(&[], 0);
            let writer = ContainerWriter::create(Cursor::new(Vec::new())).unwrap();
            let mut engine = DuplexEngine::new(writer, source, 0).with_completion(tx);
            let mut out = [0; 2];
            engine.process(&[4, 5], &mut out).unwrap();
        }
        let done = rx.try_recv().unwrap().unwrap();
        assert_eq!(done.total_samples, 2);
    }

    fn encode(samples: &[i32]) -> Vec<u8> {
        let mut out = Vec::new();
        for &s in samples {
            out.put_i32(s);
        }
        out
    }

    #[test]
    fn test_capture_is_big_endian() {
        let (mut engine, _events) = engine(&[]);
        engine.process(&[0x0102_0304, -1], &mut []).unwrap();
        let (_, sink) = engine.finish().unwrap();
        assert_eq!(&sink.get_ref()[54..], encode(&[0x0102_0304, -1]).as_slice());
    }

    proptest! {
        #[test]
        fn prop_conservation(
            source_len in 0usize..300,
            blocks in prop::collection::vec((0usize..100, 0usize..100), 0..12),
        ) {
            let source: Vec<i32> = (0..source_len as i32).collect();
            let (mut engine, _events) = engine(&source);

            let mut played = Vec::new();
            let mut captured = Vec::new();
            let mut requested = 0usize;
            for (i, (cap, out_len)) in blocks.iter().enumerate() {
                let input = vec![i as i32; *cap];
                let mut out = vec![0; *out_len];
                let cycle = engine.process(&input, &mut out).unwrap();
                prop_assert_eq!(cycle.captured, *cap);
                played.extend_from_slice(&out[..cycle.played]);
                captured.extend_from_slice(&input);
                requested += out_len;
            }

            prop_assert_eq!(played.len(), source_len.min(requested));
            prop_assert_eq!(&played[..], &source[..played.len()]);

            let (done, recorded) = recorded(engine);
            prop_assert_eq!(done.total_samples as usize, captured.len());
            prop_assert_eq!(recorded, captured);
        }
    }
}

//! cpal-backed duplex transport
//!
//! cpal only exposes separate input and output streams on most hosts, so
//! the duplex callback is driven from the output stream: each output
//! period takes whatever the input stream has queued in the ring buffer
//! and hands both blocks to the callback.
//!
//! cpal streams are not `Send`, so both live on a dedicated thread that
//! also serves start/stop/close requests.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{create_shared_buffer, CaptureAssembler, SharedRingBuffer};
use crate::audio::device::{input_device, output_device};
use crate::audio::transport::{AudioTransport, DuplexCallback, DuplexStream, StreamConfig};
use crate::config::StreamSettings;
use crate::constants::RING_BUFFER_CAPACITY;
use crate::error::AudioError;

/// Opens duplex streams on the host's audio devices
#[derive(Debug, Clone)]
pub struct CpalTransport {
    input_device: Option<String>,
    output_device: Option<String>,
    queue_frames: usize,
}

impl CpalTransport {
    pub fn new() -> Self {
        Self {
            input_device: None,
            output_device: None,
            queue_frames: RING_BUFFER_CAPACITY,
        }
    }

    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            input_device: settings.input_device.clone(),
            output_device: settings.output_device.clone(),
            queue_frames: settings.capture_queue_frames,
        }
    }
}

impl Default for CpalTransport {
    fn default() -> Self {
        Self::new()
    }
}

enum Control {
    Start(Sender<Result<(), AudioError>>),
    Stop(Sender<Result<(), AudioError>>),
    Close(Sender<Result<(), AudioError>>),
}

impl AudioTransport for CpalTransport {
    type Stream = CpalStream;

    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: DuplexCallback,
    ) -> Result<CpalStream, AudioError> {
        let (control_tx, control_rx) = bounded::<Control>(4);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (fault_tx, fault_rx) = bounded::<AudioError>(16);

        let block_len = (config.frames_per_buffer * config.input_channels as u32) as usize;
        let ring = create_shared_buffer(self.queue_frames, block_len);
        let active = Arc::new(AtomicBool::new(false));

        let input_name = self.input_device.clone();
        let output_name = self.output_device.clone();
        let config = *config;
        let thread_ring = ring.clone();
        let thread_active = active.clone();

        let handle = thread::Builder::new()
            .name("duplex-stream".to_string())
            .spawn(move || {
                let streams = build_streams(
                    input_name.as_deref(),
                    output_name.as_deref(),
                    &config,
                    thread_ring,
                    callback,
                    fault_tx,
                    thread_active.clone(),
                );
                let (input, output) = match streams {
                    Ok(streams) => {
                        let _ = ready_tx.send(Ok(()));
                        streams
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for control in control_rx.iter() {
                    match control {
                        Control::Start(reply) => {
                            thread_active.store(true, Ordering::SeqCst);
                            let result = input
                                .play()
                                .and_then(|_| output.play())
                                .map_err(AudioError::from);
                            let _ = reply.send(result);
                        }
                        Control::Stop(reply) => {
                            thread_active.store(false, Ordering::SeqCst);
                            let result = output
                                .pause()
                                .and_then(|_| input.pause())
                                .map_err(AudioError::from);
                            let _ = reply.send(result);
                        }
                        Control::Close(reply) => {
                            thread_active.store(false, Ordering::SeqCst);
                            // Dropping the streams drops the callback
                            drop(output);
                            drop(input);
                            let _ = reply.send(Ok(()));
                            return;
                        }
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::StreamError(
                    "stream thread exited during setup".to_string(),
                ));
            }
        }

        tracing::info!(
            "Opened duplex stream: {} Hz, {} frames per buffer",
            config.sample_rate,
            config.frames_per_buffer
        );

        Ok(CpalStream {
            control_tx,
            fault_rx,
            ring,
            thread_handle: Some(handle),
        })
    }
}

/// Handle to the stream thread
pub struct CpalStream {
    control_tx: Sender<Control>,
    fault_rx: Receiver<AudioError>,
    ring: SharedRingBuffer,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn request(&self, make: fn(Sender<Result<(), AudioError>>) -> Control) -> Result<(), AudioError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.control_tx
            .send(make(reply_tx))
            .map_err(|_| AudioError::InvalidState("stream thread has exited".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::InvalidState("stream thread has exited".to_string()))?
    }

    fn shutdown(&mut self) -> Result<(), AudioError> {
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };
        let result = self.request(Control::Close);
        let _ = handle.join();
        result
    }
}

impl DuplexStream for CpalStream {
    fn start(&mut self) -> Result<(), AudioError> {
        self.request(Control::Start)
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        self.request(Control::Stop)
    }

    fn close(mut self) -> Result<(), AudioError> {
        self.shutdown()
    }

    fn faults(&self) -> Option<Receiver<AudioError>> {
        Some(self.fault_rx.clone())
    }

    fn dropped_frames(&self) -> usize {
        self.ring.overflow_count()
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Failed to close stream: {}", e);
        }
    }
}

fn build_streams(
    input_name: Option<&str>,
    output_name: Option<&str>,
    config: &StreamConfig,
    ring: SharedRingBuffer,
    callback: DuplexCallback,
    fault_tx: Sender<AudioError>,
    active: Arc<AtomicBool>,
) -> Result<(cpal::Stream, cpal::Stream), AudioError> {
    let input = input_device(input_name)?;
    let output = output_device(output_name)?;

    let in_config = cpal::StreamConfig {
        channels: config.input_channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(config.frames_per_buffer),
    };
    let out_config = cpal::StreamConfig {
        channels: config.output_channels,
        ..in_config.clone()
    };

    let in_format = input.default_input_config()?.sample_format();
    let out_format = output.default_output_config()?.sample_format();
    tracing::debug!(
        "Device sample formats: input {:?}, output {:?}",
        in_format,
        out_format
    );

    let capture_ring = ring.clone();
    let capture_faults = fault_tx.clone();
    let capture_active = active.clone();
    let capture = match in_format {
        SampleFormat::F32 => {
            build_capture::<f32>(&input, &in_config, capture_ring, capture_faults, capture_active)
        }
        SampleFormat::I16 => {
            build_capture::<i16>(&input, &in_config, capture_ring, capture_faults, capture_active)
        }
        SampleFormat::I32 => {
            build_capture::<i32>(&input, &in_config, capture_ring, capture_faults, capture_active)
        }
        other => Err(AudioError::UnsupportedFormat(format!("input {:?}", other))),
    }?;

    let playback = Playback {
        ring,
        callback,
        fault_tx,
        active,
        frames: config.frames_per_buffer as usize,
    };
    let playback = match out_format {
        SampleFormat::F32 => build_playback::<f32>(&output, &out_config, playback),
        SampleFormat::I16 => build_playback::<i16>(&output, &out_config, playback),
        SampleFormat::I32 => build_playback::<i32>(&output, &out_config, playback),
        other => Err(AudioError::UnsupportedFormat(format!("output {:?}", other))),
    }?;

    Ok((capture, playback))
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: SharedRingBuffer,
    fault_tx: Sender<AudioError>,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !active.load(Ordering::Relaxed) {
                return;
            }
            let mut block = ring.take_block(data.len());
            block.extend(data.iter().map(|&s| <i32 as Sample>::from_sample(s)));
            // A full queue counts as an overflow in the ring buffer stats
            let _ = ring.push(block);
        },
        move |err| {
            let _ = fault_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

/// Everything the output callback takes ownership of
struct Playback {
    ring: SharedRingBuffer,
    callback: DuplexCallback,
    fault_tx: Sender<AudioError>,
    active: Arc<AtomicBool>,
    frames: usize,
}

fn build_playback<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    playback: Playback,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i32>,
{
    let Playback {
        ring,
        mut callback,
        fault_tx,
        active,
        frames,
    } = playback;
    let mut assembler = CaptureAssembler::new(ring, frames);
    let mut block: Vec<i32> = vec![0; frames];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if block.len() != data.len() {
                block.resize(data.len(), 0);
            }
            block.fill(0);

            if active.load(Ordering::Relaxed) {
                let captured = assembler.next_block(data.len());
                callback(captured, &mut block);
            }

            for (dst, &src) in data.iter_mut().zip(block.iter()) {
                *dst = <T as Sample>::from_sample(src);
            }
        },
        move |err| {
            let _ = fault_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

//! Microphone and speaker endpoints backed by cpal.
//!
//! cpal streams are not `Send`, so each one lives on its own thread for as
//! long as the endpoint exists. Samples cross to the async side through a
//! channel (capture) or a ring buffer (playback).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapProd;
use rubato::{FastFixedIn, Resampler};
use tokio::sync::mpsc;

use crate::audio::{AudioChunk, AudioSink, AudioSource};
use crate::error::AudioError;
use crate::settings::AudioSettings;
use crate::utils;

const INPUT_CHUNK_SIZE: usize = 1024;
const CAPTURE_QUEUE: usize = 256;
const PUSH_BACKOFF: Duration = Duration::from_millis(5);

/// Parameters of an opened device stream.
#[derive(Debug, Clone, Copy)]
struct StreamInfo {
    sample_rate: u32,
    channels: usize,
}

/// Keeps a stream alive on its own thread until dropped.
struct StreamThread {
    _shutdown: std_mpsc::Sender<()>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<(Self, StreamInfo), AudioError>
    where
        F: FnOnce() -> Result<(cpal::Stream, StreamInfo), AudioError> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Returns once the owning endpoint drops its sender.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Device(format!("failed to spawn {name}: {e}")))?;

        let info = ready_rx
            .recv()
            .map_err(|_| AudioError::Device(format!("{name} exited before starting")))??;
        Ok((Self { _shutdown: shutdown_tx }, info))
    }
}

fn device_error(e: impl std::fmt::Display) -> AudioError {
    AudioError::Device(e.to_string())
}

fn resampler(from: u32, to: u32, chunk_size: usize) -> Result<Option<FastFixedIn<f32>>, AudioError> {
    if from == to {
        return Ok(None);
    }
    utils::audio::create_resampler(f64::from(from), f64::from(to), chunk_size)
        .map(Some)
        .map_err(device_error)
}

/// Captures from an input device and hands out LINEAR16 chunks at the wire rate.
pub struct DeviceSource {
    settings: AudioSettings,
    recording: Arc<AtomicBool>,
    frames: mpsc::Receiver<Vec<f32>>,
    resampler: Option<FastFixedIn<f32>>,
    unresampled: Vec<f32>,
    pending: Vec<u8>,
    _stream: StreamThread,
}

impl DeviceSource {
    /// Opens the named input device, or the default one.
    pub fn open(device_name: Option<String>, settings: AudioSettings) -> Result<Self, AudioError> {
        let recording = Arc::new(AtomicBool::new(false));
        let (frames_tx, frames) = mpsc::channel(CAPTURE_QUEUE);

        let capture_flag = recording.clone();
        let (stream, info) = StreamThread::spawn("audio-input", move || {
            let input = utils::device::get_or_default_input(device_name).map_err(device_error)?;
            let default_config = input.default_input_config().map_err(device_error)?;
            let config = StreamConfig {
                channels: default_config.channels(),
                sample_rate: default_config.sample_rate(),
                buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
            };
            let info = StreamInfo {
                sample_rate: config.sample_rate.0,
                channels: usize::from(config.channels),
            };
            tracing::info!("input: device={:?}, config={:?}", input.name().ok(), &config);

            let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !capture_flag.load(Ordering::Acquire) {
                    return;
                }
                let mono = utils::audio::downmix(data, info.channels);
                if let Err(e) = frames_tx.try_send(mono) {
                    tracing::warn!("Dropping captured audio: {}", e);
                }
            };
            let stream = input
                .build_input_stream(
                    &config,
                    input_data_fn,
                    move |err| tracing::error!("an error occurred on input stream: {}", err),
                    None,
                )
                .map_err(device_error)?;
            stream.play().map_err(device_error)?;
            Ok((stream, info))
        })?;

        Ok(Self {
            resampler: resampler(info.sample_rate, settings.sample_rate, INPUT_CHUNK_SIZE)?,
            settings,
            recording,
            frames,
            unresampled: Vec::new(),
            pending: Vec::new(),
            _stream: stream,
        })
    }

    fn absorb(&mut self, samples: Vec<f32>) -> Result<(), AudioError> {
        let Some(resampler) = self.resampler.as_mut() else {
            self.pending.extend(utils::audio::f32_to_pcm16(&samples));
            return Ok(());
        };
        self.unresampled.extend(samples);
        loop {
            let needed = resampler.input_frames_next();
            if self.unresampled.len() < needed {
                return Ok(());
            }
            let block: Vec<f32> = self.unresampled.drain(..needed).collect();
            let resampled = resampler
                .process(&[block.as_slice()], None)
                .map_err(|e| AudioError::Source(e.to_string()))?;
            if let Some(channel) = resampled.first() {
                self.pending.extend(utils::audio::f32_to_pcm16(channel));
            }
        }
    }
}

#[async_trait]
impl AudioSource for DeviceSource {
    fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    fn sample_width(&self) -> u16 {
        self.settings.sample_width
    }

    fn start_recording(&mut self) {
        // Anything captured before this turn is stale.
        while self.frames.try_recv().is_ok() {}
        self.unresampled.clear();
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.recording.store(true, Ordering::Release);
    }

    fn stop_recording(&mut self) {
        self.recording.store(false, Ordering::Release);
    }

    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>, AudioError> {
        let iter_size = self.settings.iter_size;
        loop {
            if self.pending.len() >= iter_size {
                let chunk: Vec<u8> = self.pending.drain(..iter_size).collect();
                return Ok(Some(AudioChunk::new(chunk)));
            }
            match self.frames.recv().await {
                Some(samples) => self.absorb(samples)?,
                None => return Err(AudioError::Source("input stream closed".into())),
            }
        }
    }
}

/// Plays LINEAR16 audio at the wire rate on an output device.
pub struct DeviceSink {
    settings: AudioSettings,
    volume_percentage: u8,
    device_rate: u32,
    playing: Arc<AtomicBool>,
    discard: Arc<AtomicBool>,
    producer: HeapProd<f32>,
    resampler: Option<FastFixedIn<f32>>,
    _stream: StreamThread,
}

impl DeviceSink {
    /// Opens the named output device, or the default one.
    pub fn open(device_name: Option<String>, settings: AudioSettings) -> Result<Self, AudioError> {
        let playing = Arc::new(AtomicBool::new(false));
        let discard = Arc::new(AtomicBool::new(false));

        let (producer_tx, producer_rx) = std_mpsc::sync_channel::<HeapProd<f32>>(1);
        let block_frames = settings.block_size / usize::from(settings.sample_width);
        let flush_samples = settings.flush_size / usize::from(settings.sample_width);
        let wire_rate = settings.sample_rate;

        let (playing_flag, discard_flag) = (playing.clone(), discard.clone());
        let (stream, info) = StreamThread::spawn("audio-output", move || {
            let output = utils::device::get_or_default_output(device_name).map_err(device_error)?;
            let default_config = output.default_output_config().map_err(device_error)?;
            let config = StreamConfig {
                channels: default_config.channels(),
                sample_rate: default_config.sample_rate(),
                buffer_size: cpal::BufferSize::Fixed(FrameCount::from(block_frames as u32)),
            };
            let info = StreamInfo {
                sample_rate: config.sample_rate.0,
                channels: usize::from(config.channels),
            };
            tracing::info!("output: device={:?}, config={:?}", output.name().ok(), &config);

            // Capacity covers the flush size after rate conversion.
            let capacity = (flush_samples as u64 * u64::from(info.sample_rate) / u64::from(wire_rate)) as usize;
            let (producer, mut consumer) = utils::audio::shared_buffer(capacity.max(block_frames)).split();
            let _ = producer_tx.send(producer);

            let output_channel_count = info.channels;
            let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if discard_flag.swap(false, Ordering::AcqRel) {
                    consumer.clear();
                }
                let playing = playing_flag.load(Ordering::Acquire);
                for frame in data.chunks_mut(output_channel_count) {
                    let sample = if playing { consumer.try_pop().unwrap_or(0.0) } else { 0.0 };
                    // Mono is copied to the first two channels; the rest stay silent.
                    for (channel, out) in frame.iter_mut().enumerate() {
                        *out = if channel < 2 { sample } else { 0.0 };
                    }
                }
            };
            let stream = output
                .build_output_stream(
                    &config,
                    output_data_fn,
                    move |err| tracing::error!("an error occurred on output stream: {}", err),
                    None,
                )
                .map_err(device_error)?;
            stream.play().map_err(device_error)?;
            Ok((stream, info))
        })?;

        let producer = producer_rx
            .recv()
            .map_err(|_| AudioError::Device("output buffer was not created".into()))?;

        Ok(Self {
            resampler: resampler(settings.sample_rate, info.sample_rate, INPUT_CHUNK_SIZE)?,
            settings,
            volume_percentage: 100,
            device_rate: info.sample_rate,
            playing,
            discard,
            producer,
            _stream: stream,
        })
    }

    fn convert(&mut self, pcm16: &[u8]) -> Result<Vec<f32>, AudioError> {
        let scaled = utils::audio::scale_volume(pcm16, self.volume_percentage);
        let samples = utils::audio::pcm16_to_f32(&scaled);
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples);
        };
        let mut out = Vec::with_capacity(samples.len() * self.device_rate as usize / self.settings.sample_rate as usize + 1);
        let chunk_size = resampler.input_frames_next();
        for block in utils::audio::split_for_chunks(&samples, chunk_size) {
            let resampled = resampler
                .process(&[block.as_slice()], None)
                .map_err(|e| AudioError::Sink(e.to_string()))?;
            if let Some(channel) = resampled.first() {
                out.extend_from_slice(channel);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl AudioSink for DeviceSink {
    fn sample_rate(&self) -> u32 {
        self.settings.sample_rate
    }

    fn volume_percentage(&self) -> u8 {
        self.volume_percentage
    }

    fn set_volume_percentage(&mut self, volume_percentage: u8) {
        self.volume_percentage = volume_percentage.min(100);
    }

    fn start_playback(&mut self) {
        self.playing.store(true, Ordering::Release);
    }

    fn stop_playback(&mut self) {
        self.playing.store(false, Ordering::Release);
        self.discard.store(true, Ordering::Release);
    }

    async fn write(&mut self, pcm16: &[u8]) -> Result<(), AudioError> {
        let samples = self.convert(pcm16)?;
        let mut remaining = samples.as_slice();
        while !remaining.is_empty() {
            let pushed = self.producer.push_slice(remaining);
            remaining = &remaining[pushed..];
            if pushed == 0 {
                tokio::time::sleep(PUSH_BACKOFF).await;
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), AudioError> {
        let queued = self.producer.occupied_len() as u64;
        let expected = Duration::from_millis(queued * 1000 / u64::from(self.device_rate.max(1)));
        let drained = async {
            while !self.producer.is_empty() {
                tokio::time::sleep(PUSH_BACKOFF).await;
            }
        };
        tokio::time::timeout(expected + Duration::from_secs(1), drained)
            .await
            .map_err(|_| AudioError::Sink("playback did not drain".into()))
    }
}

//! Sound-card capture and playback through `cpal`.

//!
//! Samples cross between the device callback and the stage thread through
//! wait-free `rtrb` rings, so the callback never locks or allocates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize};
use rtrb::{Consumer, Producer, RingBuffer};

use super::params::{AudioParameters, ConfigError, DeviceProbe};
use super::source::{
    CaptureBackend, CaptureError, CaptureSource, PlaybackBackend, PlaybackError, PlaybackSink,
};
use crate::pipeline::cancel::CancelToken;

/// Ring sizes in units of max(frame, device block).
const CAPTURE_RING_FRAMES: usize = 8;
const PLAYBACK_RING_FRAMES: usize = 4;
const PULL_TIMEOUT: Duration = Duration::from_millis(100);
const RING_POLL: Duration = Duration::from_millis(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Default device for `direction` plus the best config range covering `sample_rate`.
fn select_device(
    direction: Direction,
    sample_rate: u32,
) -> Result<(cpal::Device, cpal::SupportedStreamConfigRange), ConfigError> {
    let host = cpal::default_host();
    let label = direction.label();
    let device = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
    .ok_or(ConfigError::NoDevice(label))?;

    let ranges: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().map(|it| it.collect()),
        Direction::Output => device.supported_output_configs().map(|it| it.collect()),
    }
    .map_err(|e| ConfigError::BufferSize {
        direction: label,
        reason: e.to_string(),
    })?;

    let range = ranges
        .into_iter()
        .filter(|r| r.min_sample_rate().0 <= sample_rate && sample_rate <= r.max_sample_rate().0)
        .filter(|r| matches!(r.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .min_by_key(|r| (r.sample_format() != SampleFormat::I16, r.channels()))
        .ok_or(ConfigError::UnsupportedFormat {
            direction: label,
            sample_rate,
        })?;

    Ok((device, range))
}

fn min_buffer(direction: Direction, sample_rate: u32) -> Result<usize, ConfigError> {
    let (_, range) = select_device(direction, sample_rate)?;
    match *range.buffer_size() {
        SupportedBufferSize::Range { min, .. } => Ok(min as usize),
        SupportedBufferSize::Unknown => {
            log::debug!("{} device does not report a buffer size", direction.label());
            Ok(0)
        }
    }
}

/// Asks the default `cpal` devices for their minimum buffer sizes.
///
/// A direction that will not be opened reports 0 without touching hardware.
#[derive(Clone, Copy, Debug)]
pub struct CpalProbe {
    pub input: bool,
    pub output: bool,
}

impl DeviceProbe for CpalProbe {
    fn min_capture_buffer(&self, sample_rate: u32) -> Result<usize, ConfigError> {
        if !self.input {
            return Ok(0);
        }
        min_buffer(Direction::Input, sample_rate)
    }

    fn min_playback_buffer(&self, sample_rate: u32) -> Result<usize, ConfigError> {
        if !self.output {
            return Ok(0);
        }
        min_buffer(Direction::Output, sample_rate)
    }
}

fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown".to_string())
}

/// Samples a ring holds: `frames` times the larger of a frame and a device block.
fn ring_capacity(frame_size: usize, block_len: usize, frames: usize) -> usize {
    frame_size.max(block_len).max(1) * frames
}

/// Default microphone.
pub struct CpalCapture;

impl CaptureBackend for CpalCapture {
    fn name(&self) -> String {
        "default input device".into()
    }

    fn open(&self, params: &AudioParameters) -> Result<Box<dyn CaptureSource>> {
        let sample_rate = params.sample_rate();
        let (device, range) = select_device(Direction::Input, sample_rate)?;
        let format = range.sample_format();
        let config: StreamConfig = range.with_sample_rate(cpal::SampleRate(sample_rate)).config();
        let capacity = ring_capacity(params.frame_size(), params.capture_block_len(), CAPTURE_RING_FRAMES);

        log::info!(
            "Capture: {} @ {}Hz, {} channel(s), {:?}, ring of {} samples",
            device_name(&device),
            sample_rate,
            config.channels,
            format,
            capacity
        );

        let (producer, consumer) = RingBuffer::new(capacity);
        let (faults_tx, faults) = mpsc::channel();
        let overruns = Arc::new(AtomicU64::new(0));

        let stream = match format {
            SampleFormat::I16 => {
                build_input::<i16>(&device, &config, producer, faults_tx, Arc::clone(&overruns))?
            }
            _ => build_input::<f32>(&device, &config, producer, faults_tx, Arc::clone(&overruns))?,
        };
        stream.play().context("Failed to start capture stream")?;

        Ok(Box::new(CpalCaptureSource {
            _stream: stream,
            ring: RingCapture::new(consumer, faults, overruns),
        }))
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut ring: Producer<i16>,
    faults: Sender<CaptureError>,
    overruns: Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                push_input(data, channels, &mut ring, &overruns);
            },
            move |err| {
                let fault = match err {
                    cpal::StreamError::DeviceNotAvailable => CaptureError::Device(err.to_string()),
                    _ => CaptureError::Transient(err.to_string()),
                };
                let _ = faults.send(fault);
            },
            None,
        )
        .context("Failed to build capture stream")?;
    Ok(stream)
}

/// Callback side of capture: keep the first channel, count what does not fit.
fn push_input<T>(data: &[T], channels: usize, ring: &mut Producer<i16>, overruns: &AtomicU64)
where
    T: Sample,
    i16: FromSample<T>,
{
    let mut lost = 0;
    for frame in data.chunks(channels) {
        if ring.push(i16::from_sample(frame[0])).is_err() {
            lost += 1;
        }
    }
    if lost > 0 {
        overruns.fetch_add(lost, Ordering::Relaxed);
    }
}

/// Stage side of the capture ring.
struct RingCapture {
    samples: Consumer<i16>,
    faults: Receiver<CaptureError>,
    overruns: Arc<AtomicU64>,
}

impl RingCapture {
    fn new(samples: Consumer<i16>, faults: Receiver<CaptureError>, overruns: Arc<AtomicU64>) -> Self {
        Self {
            samples,
            faults,
            overruns,
        }
    }
}

impl CaptureSource for RingCapture {
    fn pull(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        if let Ok(fault) = self.faults.try_recv() {
            return Err(fault);
        }
        let overruns = self.overruns.swap(0, Ordering::Relaxed);
        if overruns > 0 {
            return Err(CaptureError::Transient(format!(
                "{} captured samples overran the ring",
                overruns
            )));
        }

        let deadline = Instant::now() + PULL_TIMEOUT;
        while self.samples.is_empty() {
            if self.samples.is_abandoned() {
                return Err(CaptureError::EndOfStream);
            }
            if Instant::now() >= deadline {
                return Ok(0);
            }
            thread::sleep(RING_POLL);
        }

        let n = buf.len().min(self.samples.slots());
        let Ok(chunk) = self.samples.read_chunk(n) else {
            return Ok(0);
        };
        let (first, second) = chunk.as_slices();
        buf[..first.len()].copy_from_slice(first);
        buf[first.len()..n].copy_from_slice(second);
        chunk.commit_all();
        Ok(n)
    }
}

struct CpalCaptureSource {
    _stream: cpal::Stream,
    ring: RingCapture,
}

impl CaptureSource for CpalCaptureSource {
    fn pull(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        self.ring.pull(buf)
    }
}

/// Default speaker.
pub struct CpalPlayback;

impl PlaybackBackend for CpalPlayback {
    fn name(&self) -> String {
        "default output device".into()
    }

    fn open(&self, params: &AudioParameters, cancel: &CancelToken) -> Result<Box<dyn PlaybackSink>> {
        let sample_rate = params.sample_rate();
        let (device, range) = select_device(Direction::Output, sample_rate)?;
        let format = range.sample_format();
        let config: StreamConfig = range.with_sample_rate(cpal::SampleRate(sample_rate)).config();
        let capacity = ring_capacity(params.frame_size(), params.playback_block_len(), PLAYBACK_RING_FRAMES);

        log::info!(
            "Playback: {} @ {}Hz, {} channel(s), {:?}, ring of {} samples",
            device_name(&device),
            sample_rate,
            config.channels,
            format,
            capacity
        );

        let (producer, consumer) = RingBuffer::new(capacity);
        let (faults_tx, faults) = mpsc::channel();
        let underruns = Arc::new(AtomicU64::new(0));

        let stream = match format {
            SampleFormat::I16 => {
                build_output::<i16>(&device, &config, consumer, faults_tx, Arc::clone(&underruns))?
            }
            _ => build_output::<f32>(&device, &config, consumer, faults_tx, Arc::clone(&underruns))?,
        };
        stream.play().context("Failed to start playback stream")?;

        Ok(Box::new(CpalPlaybackSink {
            _stream: stream,
            ring: RingPlayback::new(producer, faults, underruns, cancel.clone()),
        }))
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut ring: Consumer<i16>,
    faults: Sender<PlaybackError>,
    underruns: Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = usize::from(config.channels.max(1));
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let missing = pull_output(data, channels, &mut ring);
                if missing > 0 {
                    underruns.fetch_add(missing as u64, Ordering::Relaxed);
                }
            },
            move |err| {
                let _ = faults.send(PlaybackError::Device(err.to_string()));
            },
            None,
        )
        .context("Failed to build playback stream")?;
    Ok(stream)
}

/// Callback side of playback: one mono sample per frame on every channel.
/// Returns how many frames were filled with silence.
fn pull_output<T>(data: &mut [T], channels: usize, ring: &mut Consumer<i16>) -> usize
where
    T: Sample + FromSample<i16>,
{
    let mut missing = 0;
    for frame in data.chunks_mut(channels) {
        let value = match ring.pop() {
            Ok(sample) => T::from_sample(sample),
            Err(_) => {
                missing += 1;
                T::EQUILIBRIUM
            }
        };
        for out in frame.iter_mut() {
            *out = value;
        }
    }
    missing
}

/// Stage side of the playback ring. Writes wait for room until the session stops.
struct RingPlayback {
    samples: Producer<i16>,
    faults: Receiver<PlaybackError>,
    underruns: Arc<AtomicU64>,
    cancel: CancelToken,
}

impl RingPlayback {
    fn new(
        samples: Producer<i16>,
        faults: Receiver<PlaybackError>,
        underruns: Arc<AtomicU64>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            samples,
            faults,
            underruns,
            cancel,
        }
    }
}

impl PlaybackSink for RingPlayback {
    fn write(&mut self, samples: &[i16]) -> Result<(), PlaybackError> {
        let mut rest = samples;
        while !rest.is_empty() {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if let Ok(fault) = self.faults.try_recv() {
                return Err(fault);
            }
            if self.samples.is_abandoned() {
                return Err(PlaybackError::Device("playback stream closed".into()));
            }
            let n = rest.len().min(self.samples.slots());
            if n == 0 {
                thread::sleep(RING_POLL);
                continue;
            }
            let written = match self.samples.write_chunk_uninit(n) {
                Ok(chunk) => chunk.fill_from_iter(rest.iter().copied()),
                Err(_) => 0,
            };
            rest = &rest[written..];
        }
        Ok(())
    }
}

impl Drop for RingPlayback {
    fn drop(&mut self) {
        let underruns = self.underruns.load(Ordering::Relaxed);
        if underruns > 0 {
            log::debug!("Playback filled {} frames with silence", underruns);
        }
    }
}

struct CpalPlaybackSink {
    _stream: cpal::Stream,
    ring: RingPlayback,
}

impl PlaybackSink for CpalPlaybackSink {
    fn write(&mut self, samples: &[i16]) -> Result<(), PlaybackError> {
        self.ring.write(samples)
    }
}

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::params::AudioParameters;
use super::source::{CaptureBackend, CaptureError, CaptureSource};

const PACE_SLEEP: Duration = Duration::from_millis(10);

pub struct AudioData {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

pub fn decode_audio(path: &Path) -> Result<AudioData> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .context("No audio tracks found")?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create audio decoder")?;

    let mut all_samples: Vec<i16> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<i16>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();

        // Downmix to mono
        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame_samples in samples.chunks(channels) {
                let sum: i32 = frame_samples.iter().map(|&s| s as i32).sum();
                all_samples.push((sum / channels as i32) as i16);
            }
        }
    }

    log::info!(
        "Decoded audio: {} samples, {}Hz, {:.1}s",
        all_samples.len(),
        sample_rate,
        all_samples.len() as f32 / sample_rate as f32
    );

    Ok(AudioData {
        samples: all_samples,
        sample_rate,
    })
}

/// Replays a decoded file as if it were a microphone, paced by the wall clock.
pub struct FileCapture {
    pub path: PathBuf,
    pub looping: bool,
}

impl CaptureBackend for FileCapture {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self, params: &AudioParameters) -> Result<Box<dyn CaptureSource>> {
        let audio = decode_audio(&self.path)?;
        if audio.sample_rate != params.sample_rate() {
            anyhow::bail!(
                "{} is sampled at {}Hz but the session runs at {}Hz",
                self.path.display(),
                audio.sample_rate,
                params.sample_rate()
            );
        }
        Ok(Box::new(PacedSource::new(audio, self.looping)))
    }
}

/// Hands out samples no faster than their sample rate.
pub struct PacedSource {
    samples: Vec<i16>,
    sample_rate: u32,
    looping: bool,
    cursor: usize,
    delivered: u64,
    started: Option<Instant>,
}

impl PacedSource {
    pub fn new(audio: AudioData, looping: bool) -> Self {
        Self {
            samples: audio.samples,
            sample_rate: audio.sample_rate,
            looping,
            cursor: 0,
            delivered: 0,
            started: None,
        }
    }

    fn due(&self, started: Instant) -> u64 {
        (started.elapsed().as_secs_f64() * self.sample_rate as f64) as u64
    }
}

impl CaptureSource for PacedSource {
    fn pull(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
        if self.cursor == self.samples.len() {
            if !self.looping || self.samples.is_empty() {
                return Err(CaptureError::EndOfStream);
            }
            self.cursor = 0;
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        let mut available = self.due(started).saturating_sub(self.delivered);
        if available == 0 {
            thread::sleep(PACE_SLEEP);
            available = self.due(started).saturating_sub(self.delivered);
        }

        let n = buf
            .len()
            .min(self.samples.len() - self.cursor)
            .min(available as usize);
        buf[..n].copy_from_slice(&self.samples[self.cursor..self.cursor + n]);
        self.cursor += n;
        self.delivered += n as u64;
        Ok(n)
    }
}

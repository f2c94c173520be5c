use anyhow::{Context, Result};
use std::f64::consts::TAU;

use super::cancel::CancelToken;
use crate::audio::params::AudioParameters;
use crate::audio::source::PlaybackBackend;

const AMPLITUDE: f64 = i16::MAX as f64;

/// Continuous sine exactly on the central bin.
#[derive(Clone, Debug)]
pub struct ToneOscillator {
    phase: f64,
    delta: f64,
}

impl ToneOscillator {
    pub fn new(harmonic: usize, frame_size: usize) -> Self {
        Self {
            phase: 0.0,
            delta: (TAU * harmonic as f64 / frame_size as f64) % TAU,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn fill(&mut self, out: &mut [i16]) {
        for sample in out.iter_mut() {
            *sample = (AMPLITUDE * self.phase.sin()) as i16;
            self.phase = (self.phase + self.delta) % TAU;
        }
    }
}

/// Tone stage: write batches to the playback sink until cancelled.
pub fn run_tone(backend: &dyn PlaybackBackend, params: &AudioParameters, cancel: &CancelToken) -> Result<()> {
    let mut sink = backend
        .open(params, cancel)
        .with_context(|| format!("Failed to open playback on {}", backend.name()))?;
    let mut oscillator = ToneOscillator::new(params.harmonic(), params.frame_size());
    let mut batch = vec![0i16; params.playback_block_len()];

    log::info!(
        "Playing {:.2}Hz calibration tone (harmonic {})",
        params.sample_rate() as f64 * params.harmonic() as f64 / params.frame_size() as f64,
        params.harmonic()
    );

    while !cancel.is_cancelled() {
        oscillator.fill(&mut batch);
        sink.write(&batch).context("Calibration tone stopped")?;
    }
    Ok(())
}

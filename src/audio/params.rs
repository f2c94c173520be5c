use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("sample rate must be positive")]
    SampleRate,
    #[error("frame size must be positive")]
    FrameSize,
    #[error("sound speed must be positive, got {0}")]
    SoundSpeed(f64),
    #[error("central frequency {freq} Hz maps to harmonic 0 at {sample_rate} Hz / {frame_size} samples")]
    ZeroHarmonic {
        freq: u32,
        sample_rate: u32,
        frame_size: usize,
    },
    #[error("central frequency {freq} Hz maps to harmonic {harmonic}, at or above the last usable bin {limit} ({sample_rate} Hz / {frame_size} samples)")]
    AboveNyquist {
        freq: u32,
        harmonic: usize,
        limit: usize,
        sample_rate: u32,
        frame_size: usize,
    },
    #[error("no default {0} device")]
    NoDevice(&'static str),
    #[error("{direction} device does not support 16-bit mono at {sample_rate} Hz")]
    UnsupportedFormat {
        direction: &'static str,
        sample_rate: u32,
    },
    #[error("{direction} device reported an invalid buffer size: {reason}")]
    BufferSize {
        direction: &'static str,
        reason: String,
    },
}

/// Sample encoding shared by capture and playback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleEncoding {
    Pcm16,
}

/// Reports the minimum device buffer sizes, in samples, for a format.
pub trait DeviceProbe {
    fn min_capture_buffer(&self, sample_rate: u32) -> Result<usize, ConfigError>;
    fn min_playback_buffer(&self, sample_rate: u32) -> Result<usize, ConfigError>;
}

/// Immutable per-session audio configuration.
#[derive(Clone, Debug)]
pub struct AudioParameters {
    sample_rate: u32,
    frame_size: usize,
    encoding: SampleEncoding,
    central_freq: u32,
    harmonic: usize,
    capture_buffer: usize,
    playback_buffer: usize,
}

impl AudioParameters {
    pub fn new(
        sample_rate: u32,
        frame_size: usize,
        central_freq: u32,
        probe: &dyn DeviceProbe,
    ) -> Result<Self, ConfigError> {
        if sample_rate == 0 {
            return Err(ConfigError::SampleRate);
        }
        if frame_size == 0 {
            return Err(ConfigError::FrameSize);
        }
        let harmonic = central_harmonic(sample_rate, frame_size, central_freq);
        if harmonic == 0 {
            return Err(ConfigError::ZeroHarmonic {
                freq: central_freq,
                sample_rate,
                frame_size,
            });
        }
        if harmonic >= frame_size / 2 {
            return Err(ConfigError::AboveNyquist {
                freq: central_freq,
                harmonic,
                limit: frame_size / 2,
                sample_rate,
                frame_size,
            });
        }
        if !frame_size.is_power_of_two() {
            log::warn!("Frame size {} is not a power of two; the FFT will be slower", frame_size);
        }

        let capture_buffer = probe.min_capture_buffer(sample_rate)?;
        let playback_buffer = probe.min_playback_buffer(sample_rate)?;

        Ok(Self {
            sample_rate,
            frame_size,
            encoding: SampleEncoding::Pcm16,
            central_freq,
            harmonic,
            capture_buffer,
            playback_buffer,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    pub fn central_freq(&self) -> u32 {
        self.central_freq
    }

    /// Spectrum bin closest to the central frequency.
    pub fn harmonic(&self) -> usize {
        self.harmonic
    }

    pub fn capture_buffer(&self) -> usize {
        self.capture_buffer
    }

    pub fn playback_buffer(&self) -> usize {
        self.playback_buffer
    }

    /// Samples requested per capture read. Devices may report 0; fall back to a frame.
    pub fn capture_block_len(&self) -> usize {
        if self.capture_buffer == 0 {
            self.frame_size
        } else {
            self.capture_buffer
        }
    }

    /// Samples written per playback batch.
    pub fn playback_block_len(&self) -> usize {
        if self.playback_buffer == 0 {
            self.frame_size
        } else {
            self.playback_buffer
        }
    }

    /// Analysis frames per second at this configuration.
    pub fn frame_rate(&self) -> f64 {
        self.sample_rate as f64 / self.frame_size as f64
    }
}

/// `round(frame_size * freq / sample_rate)`.
pub fn central_harmonic(sample_rate: u32, frame_size: usize, freq: u32) -> usize {
    ((frame_size as f64 * freq as f64) / sample_rate as f64).round() as usize
}

/// Probe with fixed answers, for sources that are not hardware devices.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedProbe {
    pub capture: usize,
    pub playback: usize,
}

impl DeviceProbe for FixedProbe {
    fn min_capture_buffer(&self, _sample_rate: u32) -> Result<usize, ConfigError> {
        Ok(self.capture)
    }

    fn min_playback_buffer(&self, _sample_rate: u32) -> Result<usize, ConfigError> {
        Ok(self.playback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPlayback;

    impl DeviceProbe for BrokenPlayback {
        fn min_capture_buffer(&self, _: u32) -> Result<usize, ConfigError> {
            Ok(1024)
        }

        fn min_playback_buffer(&self, _: u32) -> Result<usize, ConfigError> {
            Err(ConfigError::BufferSize {
                direction: "output",
                reason: "unsupported".into(),
            })
        }
    }

    #[test]
    fn harmonic_is_rounded_bin() {
        let params = AudioParameters::new(44100, 2048, 2000, &FixedProbe::default()).unwrap();
        assert_eq!(params.harmonic(), 93);
        assert_eq!(central_harmonic(44100, 1024, 4305), 100);
    }

    #[test]
    fn rejects_zero_rate_and_size() {
        let probe = FixedProbe::default();
        assert!(matches!(
            AudioParameters::new(0, 1024, 1000, &probe),
            Err(ConfigError::SampleRate)
        ));
        assert!(matches!(
            AudioParameters::new(44100, 0, 1000, &probe),
            Err(ConfigError::FrameSize)
        ));
    }

    #[test]
    fn rejects_frequency_below_first_bin() {
        let err = AudioParameters::new(44100, 256, 10, &FixedProbe::default()).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroHarmonic { .. }));
    }

    #[test]
    fn rejects_frequency_at_or_above_nyquist() {
        let probe = FixedProbe::default();
        let err = AudioParameters::new(44100, 4096, 30000, &probe).unwrap_err();
        assert!(matches!(err, ConfigError::AboveNyquist { limit: 2048, .. }));

        // exactly half the sample rate lands on bin N/2
        assert!(AudioParameters::new(44100, 1024, 22050, &probe).is_err());
        let params = AudioParameters::new(44100, 1024, 21900, &probe).unwrap();
        assert_eq!(params.harmonic(), 509);
    }

    #[test]
    fn device_buffer_failure_is_fatal() {
        let err = AudioParameters::new(44100, 1024, 1000, &BrokenPlayback).unwrap_err();
        assert!(err.to_string().contains("output"));
    }

    #[test]
    fn zero_device_buffer_falls_back_to_frame() {
        let probe = FixedProbe {
            capture: 0,
            playback: 3528,
        };
        let params = AudioParameters::new(44100, 4096, 1000, &probe).unwrap();
        assert_eq!(params.capture_block_len(), 4096);
        assert_eq!(params.playback_block_len(), 3528);
        assert_eq!(params.encoding(), SampleEncoding::Pcm16);
    }
}

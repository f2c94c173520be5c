use crate::audio::params::{AudioParameters, ConfigError};

/// Which physical situation the frequency shift is interpreted in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DopplerModel {
    /// The microphone hears a source moving relative to it: `f' = f (c + v) / c`.
    MovingSource,
    /// The tone bounces off a moving reflector: `f' = f (c + v) / (c - v)`.
    Reflector,
}

/// Everything the renderer needs to turn a bin index into a velocity.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub central_harmonic: usize,
    pub frame_size: usize,
    pub sample_rate: u32,
    /// Metres per second.
    pub sound_speed: f64,
    pub model: DopplerModel,
}

impl RenderConfig {
    pub fn new(params: &AudioParameters, sound_speed: f64, reflected: bool) -> Result<Self, ConfigError> {
        if !(sound_speed > 0.0) || !sound_speed.is_finite() {
            return Err(ConfigError::SoundSpeed(sound_speed));
        }
        Ok(Self {
            central_harmonic: params.harmonic(),
            frame_size: params.frame_size(),
            sample_rate: params.sample_rate(),
            sound_speed,
            model: if reflected {
                DopplerModel::Reflector
            } else {
                DopplerModel::MovingSource
            },
        })
    }

    pub fn harmonic_frequency(&self, harmonic: usize) -> f64 {
        self.sample_rate as f64 * harmonic as f64 / self.frame_size as f64
    }

    pub fn central_frequency(&self) -> f64 {
        self.harmonic_frequency(self.central_harmonic)
    }

    /// Relative velocity in m/s implied by energy at `harmonic`. Positive means approaching.
    pub fn velocity(&self, harmonic: usize) -> f64 {
        doppler_velocity(
            self.model,
            self.sound_speed,
            self.harmonic_frequency(harmonic),
            self.central_frequency(),
        )
    }
}

/// Invert the Doppler relation for `model`. `emitted` must be positive.
pub fn doppler_velocity(model: DopplerModel, sound_speed: f64, observed: f64, emitted: f64) -> f64 {
    match model {
        DopplerModel::Reflector => sound_speed * (observed - emitted) / (observed + emitted),
        DopplerModel::MovingSource => sound_speed * observed / emitted - sound_speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: DopplerModel) -> RenderConfig {
        RenderConfig {
            central_harmonic: 100,
            frame_size: 1024,
            sample_rate: 44100,
            sound_speed: 340.0,
            model,
        }
    }

    #[test]
    fn central_bin_is_at_rest() {
        let source = config(DopplerModel::MovingSource);
        assert!((source.central_frequency() - 4306.640625).abs() < 1e-9);
        assert_eq!(source.velocity(100), 0.0);
        assert_eq!(config(DopplerModel::Reflector).velocity(100), 0.0);
    }

    #[test]
    fn reflector_at_double_frequency() {
        let v = config(DopplerModel::Reflector).velocity(200);
        assert!((v - 340.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn moving_source_sign_follows_shift() {
        let source = config(DopplerModel::MovingSource);
        assert!(source.velocity(101) > 0.0);
        assert!(source.velocity(99) < 0.0);
        assert!((source.velocity(101) - 3.4).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_positive_sound_speed() {
        use crate::audio::params::FixedProbe;
        let params = AudioParameters::new(44100, 1024, 4305, &FixedProbe::default()).unwrap();
        assert!(RenderConfig::new(&params, 0.0, false).is_err());
        assert!(RenderConfig::new(&params, -1.0, true).is_err());
        assert!(RenderConfig::new(&params, f64::NAN, true).is_err());
        let cfg = RenderConfig::new(&params, 343.0, true).unwrap();
        assert_eq!(cfg.model, DopplerModel::Reflector);
        assert_eq!(cfg.central_harmonic, 100);
    }
}

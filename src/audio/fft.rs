use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FftError {
    #[error("expected {expected} samples, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("FFT kernel is closed")]
    Closed,
}

/// Numeric transform used by the analyzer. Must be closed exactly once.
pub trait FftKernel {
    fn size(&self) -> usize;

    /// Transform `N` real samples into `N` complex bins.
    fn forward_real(&mut self, samples: &[f32]) -> Result<Vec<Complex<f32>>, FftError>;

    /// Inverse of [`FftKernel::forward_real`], normalised so a round trip returns the input.
    fn inverse_real(&mut self, bins: &[Complex<f32>]) -> Result<Vec<f32>, FftError>;

    fn close(&mut self) -> Result<(), FftError>;
}

/// Kernel backed by precomputed `rustfft` plans.
pub struct RustFftKernel {
    size: usize,
    plans: Option<Plans>,
}

struct Plans {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl RustFftKernel {
    pub fn open(size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        log::debug!("FFT kernel opened for {} samples", size);

        Self {
            size,
            plans: Some(Plans {
                forward,
                inverse,
                buffer: vec![Complex::new(0.0, 0.0); size],
                scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            }),
        }
    }

    fn plans(&mut self, len: usize) -> Result<&mut Plans, FftError> {
        if len != self.size {
            return Err(FftError::Length {
                expected: self.size,
                actual: len,
            });
        }
        self.plans.as_mut().ok_or(FftError::Closed)
    }
}

impl FftKernel for RustFftKernel {
    fn size(&self) -> usize {
        self.size
    }

    fn forward_real(&mut self, samples: &[f32]) -> Result<Vec<Complex<f32>>, FftError> {
        let plans = self.plans(samples.len())?;
        for (slot, &s) in plans.buffer.iter_mut().zip(samples) {
            *slot = Complex::new(s, 0.0);
        }
        plans
            .forward
            .process_with_scratch(&mut plans.buffer, &mut plans.scratch);
        Ok(plans.buffer.clone())
    }

    fn inverse_real(&mut self, bins: &[Complex<f32>]) -> Result<Vec<f32>, FftError> {
        let size = self.size as f32;
        let plans = self.plans(bins.len())?;
        plans.buffer.copy_from_slice(bins);
        plans
            .inverse
            .process_with_scratch(&mut plans.buffer, &mut plans.scratch);
        Ok(plans.buffer.iter().map(|c| c.re / size).collect())
    }

    fn close(&mut self) -> Result<(), FftError> {
        self.plans.take().map(|_| ()).ok_or(FftError::Closed)?;
        log::debug!("FFT kernel for {} samples released", self.size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_tone_peaks_at_its_bin() {
        let n = 256;
        let bin = 10;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / n as f32).sin())
            .collect();

        let mut kernel = RustFftKernel::open(n);
        let spectrum = kernel.forward_real(&samples).unwrap();
        assert_eq!(spectrum.len(), n);

        let peak = spectrum[..n / 2]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().partial_cmp(&b.1.norm()).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);
        // real input mirrors into the upper half
        assert!((spectrum[n - bin].norm() - spectrum[bin].norm()).abs() < 1e-2);
    }

    #[test]
    fn inverse_restores_samples() {
        let samples: Vec<f32> = (0..64).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
        let mut kernel = RustFftKernel::open(64);
        let bins = kernel.forward_real(&samples).unwrap();
        let back = kernel.inverse_real(&bins).unwrap();
        for (a, b) in samples.iter().zip(&back) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut kernel = RustFftKernel::open(32);
        assert!(matches!(
            kernel.forward_real(&[0.0; 16]),
            Err(FftError::Length { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn close_only_once() {
        let mut kernel = RustFftKernel::open(16);
        assert!(kernel.close().is_ok());
        assert!(matches!(kernel.close(), Err(FftError::Closed)));
        assert!(matches!(kernel.forward_real(&[0.0; 16]), Err(FftError::Closed)));
    }
}

pub mod accumulator;
pub mod analyzer;
pub mod cancel;
pub mod capture;
pub mod mailbox;
pub mod renderer;
pub mod session;
pub mod tone;

use rustfft::num_complex::Complex;

/// Exactly `frame_size` consecutive capture samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Position of this frame in the capture stream, starting at 0.
    pub seq: u64,
    pub samples: Vec<i16>,
}

/// Forward transform of one frame. Bin `i` sits at `i * sample_rate / N` Hz.
#[derive(Clone, Debug)]
pub struct Spectrum {
    /// Sequence number of the frame this was computed from.
    pub seq: u64,
    pub bins: Vec<Complex<f32>>,
}

impl Spectrum {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Squared magnitude of bin `index`, or `None` past the end.
    pub fn power(&self, index: usize) -> Option<f64> {
        self.bins.get(index).map(|c| {
            let re = c.re as f64;
            let im = c.im as f64;
            re * re + im * im
        })
    }
}

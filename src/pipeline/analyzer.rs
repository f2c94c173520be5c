use anyhow::{Context, Result};
use std::sync::atomic::Ordering;

use super::mailbox::{Handoff, MailboxReceiver};
use super::session::SessionStats;
use super::{Frame, Spectrum};
use crate::audio::fft::{FftError, FftKernel};

/// Turns frames into spectra. Owns the FFT kernel and closes it when dropped.
pub struct SpectralAnalyzer<K: FftKernel> {
    kernel: Option<K>,
    time: Vec<f32>,
}

impl<K: FftKernel> SpectralAnalyzer<K> {
    pub fn new(kernel: K) -> Self {
        let time = vec![0.0; kernel.size()];
        Self {
            kernel: Some(kernel),
            time,
        }
    }

    pub fn transform(&mut self, frame: &Frame) -> Result<Spectrum, FftError> {
        let kernel = self.kernel.as_mut().ok_or(FftError::Closed)?;
        self.time.clear();
        self.time.extend(frame.samples.iter().map(|&s| s as f32));
        let bins = kernel.forward_real(&self.time)?;
        Ok(Spectrum {
            seq: frame.seq,
            bins,
        })
    }

    /// Analyse the newest frame each time one arrives until cancelled or the
    /// capture side hangs up. The kernel is released on every way out.
    ///
    /// A frame still pending when the stop arrives is analysed once more, so
    /// the last frame captured before a stop is never lost.
    pub fn run<H: Handoff<Spectrum>>(
        mut self,
        frames: &MailboxReceiver<Frame>,
        out: &mut H,
        stats: &SessionStats,
    ) -> Result<()> {
        while let Some(frame) = frames.recv() {
            self.analyse(&frame, out, stats)?;
        }
        if let Some(frame) = frames.take_pending() {
            log::debug!("Analysing frame {} pending at stop", frame.seq);
            self.analyse(&frame, out, stats)?;
        }
        Ok(())
    }

    fn analyse<H: Handoff<Spectrum>>(&mut self, frame: &Frame, out: &mut H, stats: &SessionStats) -> Result<()> {
        let spectrum = self
            .transform(frame)
            .with_context(|| format!("Failed to transform frame {}", frame.seq))?;
        stats.frames_analyzed.fetch_add(1, Ordering::Relaxed);
        out.accept(spectrum);
        Ok(())
    }
}

impl<K: FftKernel> Drop for SpectralAnalyzer<K> {
    fn drop(&mut self) {
        if let Some(mut kernel) = self.kernel.take() {
            match kernel.close() {
                Ok(()) => log::debug!("Analyzer released its FFT kernel"),
                Err(e) => log::warn!("Failed to release FFT kernel: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fft::RustFftKernel;
    use crate::pipeline::cancel::CancelToken;
    use crate::pipeline::mailbox::mailbox;
    use rustfft::num_complex::Complex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Wraps the real kernel, sleeping on every transform and counting closes.
    struct SlowKernel {
        inner: RustFftKernel,
        delay: Duration,
        closes: Arc<AtomicUsize>,
    }

    impl FftKernel for SlowKernel {
        fn size(&self) -> usize {
            self.inner.size()
        }

        fn forward_real(&mut self, samples: &[f32]) -> Result<Vec<Complex<f32>>, FftError> {
            thread::sleep(self.delay);
            self.inner.forward_real(samples)
        }

        fn inverse_real(&mut self, bins: &[Complex<f32>]) -> Result<Vec<f32>, FftError> {
            self.inner.inverse_real(bins)
        }

        fn close(&mut self) -> Result<(), FftError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close()
        }
    }

    #[derive(Default)]
    struct Seen(Vec<u64>);

    impl Handoff<Spectrum> for Seen {
        fn accept(&mut self, item: Spectrum) -> bool {
            self.0.push(item.seq);
            false
        }
    }

    fn frame(seq: u64, n: usize) -> Frame {
        Frame {
            seq,
            samples: vec![seq as i16; n],
        }
    }

    fn slow(n: usize, delay_ms: u64, closes: &Arc<AtomicUsize>) -> SpectralAnalyzer<SlowKernel> {
        SpectralAnalyzer::new(SlowKernel {
            inner: RustFftKernel::open(n),
            delay: Duration::from_millis(delay_ms),
            closes: Arc::clone(closes),
        })
    }

    #[test]
    fn dc_frame_lands_in_bin_zero() {
        let mut analyzer = SpectralAnalyzer::new(RustFftKernel::open(8));
        let spectrum = analyzer.transform(&frame(3, 8)).unwrap();
        assert_eq!(spectrum.seq, 3);
        assert_eq!(spectrum.len(), 8);
        assert!((spectrum.bins[0].re - 24.0).abs() < 1e-4);
        assert!(spectrum.power(1).unwrap() < 1e-6);
    }

    #[test]
    fn slow_analyzer_skips_to_latest_and_sees_final_frame() {
        let cancel = CancelToken::new();
        let (tx, rx) = mailbox::<Frame>(&cancel);
        let closes = Arc::new(AtomicUsize::new(0));
        let analyzer = slow(64, 15, &closes);
        let stats = Arc::new(SessionStats::default());

        let worker_stats = Arc::clone(&stats);
        let worker = thread::spawn(move || {
            let mut seen = Seen::default();
            analyzer.run(&rx, &mut seen, &worker_stats).map(|_| seen.0)
        });

        for seq in 0..40 {
            tx.send(frame(seq, 64));
            thread::sleep(Duration::from_millis(1));
        }
        drop(tx);

        let seen = worker.join().unwrap().unwrap();
        assert_eq!(seen.last(), Some(&39));
        assert!(seen.len() < 40, "expected stale frames to be skipped");
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stats.frames_analyzed.load(Ordering::Relaxed), seen.len() as u64);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_stops_busy_analyzer_promptly() {
        let cancel = CancelToken::new();
        let (tx, rx) = mailbox::<Frame>(&cancel);
        let closes = Arc::new(AtomicUsize::new(0));
        let analyzer = slow(64, 50, &closes);

        let worker = thread::spawn(move || {
            let stats = SessionStats::default();
            let mut seen = Seen::default();
            analyzer.run(&rx, &mut seen, &stats).map(|_| seen.0)
        });

        let mut last = 0;
        for seq in 0..60 {
            tx.send(frame(seq, 64));
            last = seq;
            thread::sleep(Duration::from_millis(2));
        }

        let stop_requested = Instant::now();
        cancel.cancel();

        let seen = worker.join().unwrap().unwrap();
        assert!(stop_requested.elapsed() < Duration::from_secs(2));
        assert!(seen.len() < 60);
        assert_eq!(seen.last(), Some(&last));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        drop(tx);
    }

    #[test]
    fn kernel_is_released_when_transform_fails() {
        let cancel = CancelToken::new();
        let (tx, rx) = mailbox::<Frame>(&cancel);
        let closes = Arc::new(AtomicUsize::new(0));
        let analyzer = slow(64, 0, &closes);

        tx.send(frame(0, 32));
        drop(tx);
        let stats = SessionStats::default();
        let err = analyzer.run(&rx, &mut Seen::default(), &stats).unwrap_err();

        assert!(format!("{:#}", err).contains("expected 64 samples"));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}

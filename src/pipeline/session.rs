//! One run of the pipeline: four stage threads sharing a stop signal.

use anyhow::{Context, Result};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::analyzer::SpectralAnalyzer;
use super::cancel::CancelToken;
use super::capture::run_capture;
use super::mailbox::{mailbox, MailboxMonitor};
use super::renderer::VelocityRenderer;
use super::tone::run_tone;
use super::{Frame, Spectrum};
use crate::audio::fft::FftKernel;
use crate::audio::params::AudioParameters;
use crate::audio::source::{CaptureBackend, PlaybackBackend};
use crate::encode::readings::ReadingsWriter;
use crate::render::scene::Reading;
use crate::render::velocity::RenderConfig;
use crate::render::RenderSink;

/// Counters updated by the stages while they run.
#[derive(Default)]
pub struct SessionStats {
    pub frames_captured: AtomicU64,
    pub transient_errors: AtomicU64,
    pub frames_analyzed: AtomicU64,
    pub frames_rendered: AtomicU64,
    peak: Mutex<Option<Reading>>,
}

impl SessionStats {
    pub fn record_peak(&self, reading: Reading) {
        *self.peak.lock().unwrap_or_else(PoisonError::into_inner) = Some(reading);
    }

    pub fn peak(&self) -> Option<Reading> {
        self.peak.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub frames_analyzed: u64,
    pub spectra_dropped: u64,
    pub frames_rendered: u64,
    pub transient_errors: u64,
    pub peak: Option<Reading>,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames captured, {} analysed ({} skipped), {} rendered ({} skipped)",
            self.frames_captured,
            self.frames_analyzed,
            self.frames_dropped,
            self.frames_rendered,
            self.spectra_dropped
        )?;
        if self.transient_errors > 0 {
            write!(f, ", {} read errors ignored", self.transient_errors)?;
        }
        if let Some(peak) = &self.peak {
            write!(
                f,
                "; peak {:.2}Hz at {:.1} cm/s",
                peak.frequency_hz,
                peak.velocity_m_s * 100.0
            )?;
        }
        Ok(())
    }
}

/// Everything needed to start a session.
pub struct SessionSetup<R, K> {
    pub params: AudioParameters,
    pub render: RenderConfig,
    pub capture: Box<dyn CaptureBackend>,
    pub playback: Option<Box<dyn PlaybackBackend>>,
    pub kernel: K,
    pub sink: R,
    pub readings: Option<ReadingsWriter<Box<dyn Write + Send>>>,
}

struct Stage {
    name: &'static str,
    /// The session is over once every essential stage has returned.
    essential: bool,
    handle: JoinHandle<Result<()>>,
}

pub struct Session {
    cancel: CancelToken,
    stages: Vec<Stage>,
    stats: Arc<SessionStats>,
    frames: MailboxMonitor,
    spectra: MailboxMonitor,
    started: Instant,
}

fn spawn_stage<F>(name: &'static str, essential: bool, body: F) -> Result<Stage>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("doppler-{}", name))
        .spawn(body)
        .with_context(|| format!("Failed to spawn {} thread", name))?;
    Ok(Stage {
        name,
        essential,
        handle,
    })
}

impl Session {
    pub fn start<R, K>(setup: SessionSetup<R, K>) -> Result<Self>
    where
        R: RenderSink + Send + 'static,
        K: FftKernel + Send + 'static,
    {
        let SessionSetup {
            params,
            render,
            capture,
            playback,
            kernel,
            sink,
            readings,
        } = setup;

        let cancel = CancelToken::new();
        let stats = Arc::new(SessionStats::default());
        let (frame_tx, frame_rx) = mailbox::<Frame>(&cancel);
        let (mut spectrum_tx, spectrum_rx) = mailbox::<Spectrum>(&cancel);

        let mut session = Session {
            cancel: cancel.clone(),
            stages: Vec::with_capacity(4),
            stats: Arc::clone(&stats),
            frames: frame_tx.monitor(),
            spectra: spectrum_tx.monitor(),
            started: Instant::now(),
        };

        log::info!(
            "Starting session: {}Hz, {} samples/frame ({:.1} frames/s), central {}Hz -> harmonic {} ({:.2}Hz), {:?}",
            params.sample_rate(),
            params.frame_size(),
            params.frame_rate(),
            params.central_freq(),
            params.harmonic(),
            render.central_frequency(),
            render.model
        );

        // downstream first, so nothing is produced before it can be consumed
        let renderer_stats = Arc::clone(&stats);
        let mut renderer = VelocityRenderer::new(render, sink, readings);
        session.stages.push(spawn_stage("renderer", true, move || {
            renderer.run(&spectrum_rx, &renderer_stats)
        })?);

        let analyzer_stats = Arc::clone(&stats);
        let analyzer = SpectralAnalyzer::new(kernel);
        let launched = spawn_stage("analyzer", true, move || {
            analyzer.run(&frame_rx, &mut spectrum_tx, &analyzer_stats)
        });
        session.adopt(launched)?;

        let capture_stats = Arc::clone(&stats);
        let capture_cancel = cancel.clone();
        let capture_params = params.clone();
        let launched = spawn_stage("capture", true, move || {
            run_capture(
                capture.as_ref(),
                &capture_params,
                frame_tx,
                &capture_cancel,
                &capture_stats,
            )
        });
        session.adopt(launched)?;

        if let Some(playback) = playback {
            let tone_cancel = cancel.clone();
            let launched = spawn_stage("tone", false, move || {
                run_tone(playback.as_ref(), &params, &tone_cancel)
            });
            session.adopt(launched)?;
        }

        Ok(session)
    }

    /// Keep a freshly spawned stage, or tear down the ones already running.
    fn adopt(&mut self, launched: Result<Stage>) -> Result<()> {
        match launched {
            Ok(stage) => {
                self.stages.push(stage);
                Ok(())
            }
            Err(err) => {
                self.cancel.cancel();
                self.join_all();
                Err(err)
            }
        }
    }

    /// True once capture, analysis and rendering have all returned, e.g. at end of input.
    pub fn is_finished(&self) -> bool {
        self.stages
            .iter()
            .filter(|s| s.essential)
            .all(|s| s.handle.is_finished())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let frames = self.frames.stats();
        let spectra = self.spectra.stats();
        StatsSnapshot {
            elapsed: self.started.elapsed(),
            frames_captured: self.stats.frames_captured.load(Ordering::Relaxed),
            frames_dropped: frames.dropped,
            frames_analyzed: self.stats.frames_analyzed.load(Ordering::Relaxed),
            spectra_dropped: spectra.dropped,
            frames_rendered: self.stats.frames_rendered.load(Ordering::Relaxed),
            transient_errors: self.stats.transient_errors.load(Ordering::Relaxed),
            peak: self.stats.peak(),
        }
    }

    /// Signal every stage to stop and wait for all of them.
    ///
    /// Returns the first stage failure after every thread has been joined.
    pub fn stop(mut self) -> Result<StatsSnapshot> {
        self.cancel.cancel();
        let failure = self.join_all();
        let snapshot = self.snapshot();
        log::info!(
            "Session stopped after {:.1}s: {}",
            snapshot.elapsed.as_secs_f64(),
            snapshot
        );
        match failure {
            Some(err) => Err(err),
            None => Ok(snapshot),
        }
    }

    fn join_all(&mut self) -> Option<anyhow::Error> {
        let mut failure = None;
        for stage in self.stages.drain(..) {
            let err = match stage.handle.join() {
                Ok(Ok(())) => {
                    log::debug!("{} stage stopped", stage.name);
                    continue;
                }
                Ok(Err(err)) => err.context(format!("{} stage failed", stage.name)),
                Err(_) => anyhow::anyhow!("{} stage panicked", stage.name),
            };
            log::error!("{:#}", err);
            failure.get_or_insert(err);
        }
        failure
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.stages.is_empty() {
            self.cancel.cancel();
            self.join_all();
        }
    }
}

/// Owns at most one session at a time.
#[derive(Default)]
pub struct SessionController {
    active: Option<Session>,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<F>(&mut self, launch: F) -> Result<()>
    where
        F: FnOnce() -> Result<Session>,
    {
        if self.active.is_some() {
            anyhow::bail!("A session is already running; stop it before starting another");
        }
        self.active = Some(launch()?);
        Ok(())
    }

    /// Stop and join the active session. Returns `None` if nothing was running.
    pub fn stop(&mut self) -> Result<Option<StatsSnapshot>> {
        match self.active.take() {
            Some(session) => session.stop().map(Some),
            None => Ok(None),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::fft::RustFftKernel;
    use crate::audio::params::FixedProbe;
    use crate::audio::source::{CaptureError, CaptureSource};
    use crate::render::canvas::CanvasSink;

    const N: usize = 1024;

    /// Carrier on bin 100 plus a weaker sideband on bin 105, in uneven reads.
    struct TwoTone {
        t: usize,
        remaining: usize,
        read_sizes: [usize; 3],
        turn: usize,
    }

    impl CaptureSource for TwoTone {
        fn pull(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError> {
            if self.remaining == 0 {
                return Err(CaptureError::EndOfStream);
            }
            let n = self.read_sizes[self.turn % 3].min(buf.len()).min(self.remaining);
            self.turn += 1;
            for slot in &mut buf[..n] {
                let phase = 2.0 * std::f64::consts::PI * self.t as f64 / N as f64;
                let value = 10_000.0 * (100.0 * phase).sin() + 2_000.0 * (105.0 * phase).sin();
                *slot = value as i16;
                self.t += 1;
            }
            self.remaining -= n;
            Ok(n)
        }
    }

    struct TwoToneBackend {
        frames: usize,
    }

    impl CaptureBackend for TwoToneBackend {
        fn name(&self) -> String {
            "two-tone".into()
        }

        fn open(&self, _: &AudioParameters) -> Result<Box<dyn CaptureSource>> {
            Ok(Box::new(TwoTone {
                t: 0,
                remaining: self.frames * N,
                read_sizes: [300, 1500, 77],
                turn: 0,
            }))
        }
    }

    /// Never produces anything; each pull naps briefly like an idle device.
    struct Idle;

    impl CaptureSource for Idle {
        fn pull(&mut self, _: &mut [i16]) -> Result<usize, CaptureError> {
            thread::sleep(Duration::from_millis(20));
            Ok(0)
        }
    }

    struct IdleBackend;

    impl CaptureBackend for IdleBackend {
        fn name(&self) -> String {
            "idle".into()
        }

        fn open(&self, _: &AudioParameters) -> Result<Box<dyn CaptureSource>> {
            Ok(Box::new(Idle))
        }
    }

    fn setup(capture: Box<dyn CaptureBackend>) -> SessionSetup<CanvasSink, RustFftKernel> {
        let params = AudioParameters::new(44100, N, 4307, &FixedProbe::default()).unwrap();
        let render = RenderConfig::new(&params, 340.0, false).unwrap();
        SessionSetup {
            params,
            render,
            capture,
            playback: None,
            kernel: RustFftKernel::open(N),
            sink: CanvasSink::new(320, 200, None, None),
            readings: None,
        }
    }

    fn wait_until_finished(session: &Session) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !session.is_finished() {
            assert!(Instant::now() < deadline, "session did not drain");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn end_of_input_drains_pipeline() {
        let session = Session::start(setup(Box::new(TwoToneBackend { frames: 12 }))).unwrap();
        wait_until_finished(&session);

        let snapshot = session.stop().unwrap();
        assert_eq!(snapshot.frames_captured, 12);
        assert!(snapshot.frames_analyzed >= 1);
        assert_eq!(snapshot.frames_analyzed + snapshot.frames_dropped, 12);
        assert!(snapshot.frames_rendered >= 1);

        let peak = snapshot.peak.expect("sideband should be detected");
        assert_eq!(peak.harmonic, 105);
        assert!(peak.velocity_m_s > 0.0);
    }

    #[test]
    fn stop_interrupts_idle_capture() {
        let session = Session::start(setup(Box::new(IdleBackend))).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!session.is_finished());

        let requested = Instant::now();
        let snapshot = session.stop().unwrap();
        assert!(requested.elapsed() < Duration::from_secs(2));
        assert_eq!(snapshot.frames_rendered, 0);
    }

    #[test]
    fn controller_runs_one_session_at_a_time() {
        let mut controller = SessionController::new();
        controller
            .start(|| Session::start(setup(Box::new(IdleBackend))))
            .unwrap();
        assert!(controller.is_running());

        let second = controller.start(|| Session::start(setup(Box::new(IdleBackend))));
        assert!(second.is_err());

        assert!(controller.stop().unwrap().is_some());
        assert!(!controller.is_running());
        assert!(controller.stop().unwrap().is_none());

        controller
            .start(|| Session::start(setup(Box::new(IdleBackend))))
            .unwrap();
        controller.stop().unwrap();
    }

    #[test]
    fn failing_capture_surfaces_on_stop() {
        struct Broken;

        impl CaptureBackend for Broken {
            fn name(&self) -> String {
                "broken".into()
            }

            fn open(&self, _: &AudioParameters) -> Result<Box<dyn CaptureSource>> {
                anyhow::bail!("device busy")
            }
        }

        let session = Session::start(setup(Box::new(Broken))).unwrap();
        wait_until_finished(&session);
        let err = session.stop().unwrap_err();
        assert!(format!("{:#}", err).contains("device busy"));
    }
}

use anyhow::Result;
use std::io::Write;
use std::sync::atomic::Ordering;

use super::mailbox::MailboxReceiver;
use super::session::SessionStats;
use super::Spectrum;
use crate::encode::readings::ReadingsWriter;
use crate::render::scene::{build_scene, draw_scene};
use crate::render::velocity::RenderConfig;
use crate::render::{DrawSurface, RenderSink};

pub struct VelocityRenderer<R: RenderSink> {
    config: RenderConfig,
    sink: R,
    readings: Option<ReadingsWriter<Box<dyn Write + Send>>>,
}

impl<R: RenderSink> VelocityRenderer<R> {
    pub fn new(
        config: RenderConfig,
        sink: R,
        readings: Option<ReadingsWriter<Box<dyn Write + Send>>>,
    ) -> Self {
        Self {
            config,
            sink,
            readings,
        }
    }

    /// Draw the newest spectrum each time one arrives. The sink and readings
    /// are finished even when rendering fails.
    pub fn run(&mut self, spectra: &MailboxReceiver<Spectrum>, stats: &SessionStats) -> Result<()> {
        let rendered = self.render_loop(spectra, stats);
        let finished = self.sink.finish();
        let flushed = match self.readings.as_mut() {
            Some(readings) => readings.flush(),
            None => Ok(()),
        };
        rendered.and(finished).and(flushed)
    }

    fn render_loop(&mut self, spectra: &MailboxReceiver<Spectrum>, stats: &SessionStats) -> Result<()> {
        while let Some(spectrum) = spectra.recv() {
            let Some(mut surface) = self.sink.begin_frame() else {
                continue;
            };
            let scene = build_scene(&spectrum, &self.config, surface.width(), surface.height());
            draw_scene(&scene, &mut surface);
            if spectra.is_cancelled() {
                // stop arrived mid-frame; the frame is never posted
                break;
            }
            self.sink.end_frame(surface)?;
            stats.frames_rendered.fetch_add(1, Ordering::Relaxed);

            if let Some(peak) = scene.peak {
                log::debug!(
                    "Frame {}: peak at {:.2}Hz, {:.1} cm/s",
                    peak.seq,
                    peak.frequency_hz,
                    peak.velocity_m_s * 100.0
                );
                if let Some(readings) = self.readings.as_mut() {
                    readings.write(&peak)?;
                }
                stats.record_peak(peak);
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn sink(&self) -> &R {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cancel::CancelToken;
    use crate::pipeline::mailbox::mailbox;
    use crate::render::velocity::DopplerModel;
    use crate::render::Rgba;
    use rustfft::num_complex::Complex;
    use std::sync::{Arc, Mutex};

    struct NullSurface;

    impl DrawSurface for NullSurface {
        fn width(&self) -> u32 {
            1000
        }
        fn height(&self) -> u32 {
            500
        }
        fn clear(&mut self, _: Rgba) {}
        fn draw_vertical_line(&mut self, _: f32, _: f32, _: f32, _: Rgba, _: f32) {}
        fn draw_text(&mut self, _: &str, _: f32, _: f32, _: Rgba, _: f32) {}
    }

    #[derive(Default)]
    struct CountingSink {
        posted: u64,
        finished: bool,
        skip: bool,
    }

    impl RenderSink for CountingSink {
        type Surface = NullSurface;

        fn begin_frame(&mut self) -> Option<NullSurface> {
            (!self.skip).then_some(NullSurface)
        }

        fn end_frame(&mut self, _: NullSurface) -> Result<()> {
            self.posted += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn config() -> RenderConfig {
        RenderConfig {
            central_harmonic: 100,
            frame_size: 1024,
            sample_rate: 44100,
            sound_speed: 340.0,
            model: DopplerModel::Reflector,
        }
    }

    fn spectrum(seq: u64, sideband: usize) -> Spectrum {
        let mut bins = vec![Complex::new(0.0, 0.0); 1024];
        bins[100] = Complex::new(100.0, 0.0);
        bins[sideband] = Complex::new(0.0, 30.0);
        Spectrum { seq, bins }
    }

    #[test]
    fn renders_latest_and_logs_readings() {
        let cancel = CancelToken::new();
        let (tx, rx) = mailbox(&cancel);
        let buf = SharedBuf::default();
        let readings = ReadingsWriter::new(Box::new(buf.clone()) as Box<dyn Write + Send>);
        let mut renderer = VelocityRenderer::new(config(), CountingSink::default(), Some(readings));
        let stats = SessionStats::default();

        tx.send(spectrum(0, 95));
        tx.send(spectrum(1, 103));
        drop(tx);
        renderer.run(&rx, &stats).unwrap();

        assert_eq!(renderer.sink().posted, 1);
        assert!(renderer.sink().finished);
        assert_eq!(stats.frames_rendered.load(Ordering::Relaxed), 1);
        assert_eq!(stats.peak().map(|p| p.harmonic), Some(103));

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"seq\":1"));
    }

    #[test]
    fn skipped_surfaces_are_not_posted() {
        let cancel = CancelToken::new();
        let (tx, rx) = mailbox(&cancel);
        let sink = CountingSink {
            skip: true,
            ..Default::default()
        };
        let mut renderer = VelocityRenderer::new(config(), sink, None);
        let stats = SessionStats::default();

        tx.send(spectrum(0, 101));
        drop(tx);
        renderer.run(&rx, &stats).unwrap();
        assert_eq!(renderer.sink().posted, 0);
        assert!(renderer.sink().finished);
    }

    #[test]
    fn nothing_is_posted_after_cancel() {
        let cancel = CancelToken::new();
        let (tx, rx) = mailbox(&cancel);
        let mut renderer = VelocityRenderer::new(config(), CountingSink::default(), None);
        let stats = SessionStats::default();

        tx.send(spectrum(0, 101));
        cancel.cancel();
        renderer.run(&rx, &stats).unwrap();
        assert_eq!(renderer.sink().posted, 0);
        assert!(renderer.sink().finished);
    }
}

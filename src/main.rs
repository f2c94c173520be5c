mod audio;
mod cli;
mod config;
mod encode;
mod pipeline;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use audio::decode::FileCapture;
use audio::device::{CpalCapture, CpalPlayback, CpalProbe};
use audio::fft::RustFftKernel;
use audio::params::{AudioParameters, DeviceProbe, FixedProbe};
use audio::source::{CaptureBackend, PlaybackBackend};
use cli::Cli;
use encode::ffmpeg::FfmpegEncoder;
use encode::readings::ReadingsWriter;
use pipeline::session::{Session, SessionController, SessionSetup};
use render::canvas::CanvasSink;
use render::text::{find_system_font, load_font_from_url, TextOverlay};
use render::velocity::RenderConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    if let Some(path) = config::find_config(cli.config.as_deref()) {
        match config::load_config(&path) {
            Some(settings) => {
                log::info!("Loaded config from {}", path.display());
                settings.merge_into(&mut cli);
            }
            None => log::warn!("Failed to load config from {}", path.display()),
        }
    }

    if let Some(duration) = cli.duration {
        if duration.is_nan() || duration <= 0.0 {
            anyhow::bail!("--duration must be positive, got {}", duration);
        }
    }

    let tone = cli.plays_tone();
    if let Some(input) = &cli.input {
        if !input.exists() {
            anyhow::bail!("Input file not found: {}", input.display());
        }
    }

    // 1. Validate the configuration before anything starts
    let probe: Box<dyn DeviceProbe> = if cli.input.is_some() && !tone {
        Box::new(FixedProbe::default())
    } else {
        Box::new(CpalProbe {
            input: cli.input.is_none(),
            output: tone,
        })
    };
    let params = AudioParameters::new(cli.sample_rate, cli.frame_size, cli.central_freq, probe.as_ref())
        .context("Invalid audio configuration")?;
    let render = RenderConfig::new(&params, cli.sound_speed, cli.reflected)
        .context("Invalid Doppler configuration")?;

    log::info!("doppler - live Doppler velocity meter");
    log::info!(
        "Audio: {}Hz {:?} mono, frame {} samples, device buffers {}/{} samples",
        params.sample_rate(),
        params.encoding(),
        params.frame_size(),
        params.capture_buffer(),
        params.playback_buffer()
    );
    log::info!(
        "Central {}Hz, sound speed {}m/s, {} sound{}",
        params.central_freq(),
        cli.sound_speed,
        if cli.reflected { "reflected" } else { "direct" },
        if tone { ", tone on" } else { "" }
    );

    // 2. Outputs
    let text = if let Some(path) = &cli.font {
        Some(TextOverlay::from_path(path)?)
    } else if let Some(url) = &cli.font_url {
        match load_font_from_url(url).and_then(|bytes| TextOverlay::from_bytes(&bytes)) {
            Ok(overlay) => Some(overlay),
            Err(err) => {
                log::warn!("Failed to load font from URL: {:#}", err);
                None
            }
        }
    } else if let Some(path) = find_system_font() {
        match TextOverlay::from_path(&path) {
            Ok(overlay) => {
                log::info!("Using system font {}", path.display());
                Some(overlay)
            }
            Err(err) => {
                log::warn!("Failed to load system font: {:#}", err);
                None
            }
        }
    } else {
        None
    };

    let encoder = match &cli.record {
        Some(path) => Some(FfmpegEncoder::new(
            path,
            cli.width,
            cli.height,
            params.frame_rate(),
            &cli.codec,
            cli.crf,
        )?),
        None => None,
    };

    let readings = match &cli.readings {
        Some(path) => {
            log::info!("Writing readings to {}", path.display());
            Some(ReadingsWriter::create(path)?)
        }
        None => None,
    };

    let capture: Box<dyn CaptureBackend> = match &cli.input {
        Some(path) => Box::new(FileCapture {
            path: path.clone(),
            looping: cli.looping,
        }),
        None => Box::new(CpalCapture),
    };
    let playback: Option<Box<dyn PlaybackBackend>> = if tone {
        Some(Box::new(CpalPlayback))
    } else {
        None
    };

    // 3. Run until the duration passes, Enter is pressed or the input ends
    let mut controller = SessionController::new();
    let sink = CanvasSink::new(cli.width, cli.height, text, encoder);
    let kernel = RustFftKernel::open(params.frame_size());
    controller.start(move || {
        Session::start(SessionSetup {
            params,
            render,
            capture,
            playback,
            kernel,
            sink,
            readings,
        })
    })?;

    let (enter_tx, enter_rx) = mpsc::channel();
    if cli.duration.is_none() {
        log::info!("Press Enter to stop");
        thread::Builder::new()
            .name("doppler-stdin".into())
            .spawn(move || {
                let mut line = String::new();
                if matches!(std::io::stdin().read_line(&mut line), Ok(n) if n > 0) {
                    enter_tx.send(()).ok();
                }
            })
            .context("Failed to spawn stdin thread")?;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));

    let deadline = cli.duration.map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    while let Some(session) = controller.session() {
        if session.is_finished() {
            log::info!("Input ended");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) || enter_rx.try_recv().is_ok() {
            break;
        }
        let snapshot = session.snapshot();
        let peak = match &snapshot.peak {
            Some(p) => format!("{:.2}Hz {:+.1} cm/s", p.frequency_hz, p.velocity_m_s * 100.0),
            None => "no sideband".into(),
        };
        pb.set_message(format!(
            "{} frames analysed, {} skipped | peak {}",
            snapshot.frames_analyzed, snapshot.frames_dropped, peak
        ));
        thread::sleep(Duration::from_millis(100));
    }

    pb.finish_and_clear();
    let stopped = controller.stop();

    if let Some(path) = &cli.save_config {
        config::save_config(path, &config::Settings::from_cli(&cli))?;
        log::info!("Saved settings to {}", path.display());
    }

    if let Some(snapshot) = stopped? {
        log::info!("Done: {}", snapshot);
    }
    Ok(())
}

use anyhow::{Context, Result};
use std::sync::atomic::Ordering;

use super::accumulator::FrameAccumulator;
use super::cancel::CancelToken;
use super::mailbox::MailboxSender;
use super::session::SessionStats;
use super::Frame;
use crate::audio::params::AudioParameters;
use crate::audio::source::{CaptureBackend, CaptureError};

/// Capture stage: pull blocks from the source and cut them into frames.
///
/// Returning drops the frame sender, which lets the analyzer drain and stop.
pub fn run_capture(
    backend: &dyn CaptureBackend,
    params: &AudioParameters,
    frames: MailboxSender<Frame>,
    cancel: &CancelToken,
    stats: &SessionStats,
) -> Result<()> {
    let mut source = backend
        .open(params)
        .with_context(|| format!("Failed to open capture source {}", backend.name()))?;
    let mut block = vec![0i16; params.capture_block_len()];
    let mut accumulator = FrameAccumulator::new(params.frame_size(), frames);

    log::info!(
        "Capturing from {} in blocks of {} samples",
        backend.name(),
        block.len()
    );

    let result = loop {
        if cancel.is_cancelled() {
            break Ok(());
        }
        match source.pull(&mut block) {
            Ok(read) => {
                let completed = accumulator.submit(&block, read);
                stats
                    .frames_captured
                    .fetch_add(completed as u64, Ordering::Relaxed);
            }
            Err(CaptureError::Transient(reason)) => {
                // treated as an empty read; nothing is fabricated
                stats.transient_errors.fetch_add(1, Ordering::Relaxed);
                log::debug!("Ignoring failed capture read: {}", reason);
            }
            Err(CaptureError::EndOfStream) => {
                log::info!("Capture source {} ended", backend.name());
                break Ok(());
            }
            Err(err @ CaptureError::Device(_)) => {
                break Err(anyhow::Error::new(err).context("Capture stopped"));
            }
        }
    };

    drop(source);
    log::debug!(
        "Capture released after {} frames ({} displaced, {} samples unfinished)",
        accumulator.frames_completed(),
        accumulator.frames_displaced(),
        accumulator.pending()
    );
    result
}

//! Device-facing seams of the pipeline.
//!
//! Backends are `Send` so they can be moved into a stage thread; the source or
//! sink they open stays on that thread, since device streams often are not.

use anyhow::Result;
use thiserror::Error;

use super::params::AudioParameters;
use crate::pipeline::cancel::CancelToken;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// A single read failed; the next one may succeed.
    #[error("transient capture error: {0}")]
    Transient(String),
    #[error("capture stream ended")]
    EndOfStream,
    #[error("capture device failed: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("playback device failed: {0}")]
    Device(String),
}

/// Blocking pull of mono 16-bit samples.
pub trait CaptureSource {
    /// Fill the front of `buf` and return how many samples were written.
    /// Short reads, including `Ok(0)`, are normal.
    fn pull(&mut self, buf: &mut [i16]) -> Result<usize, CaptureError>;
}

/// Blocking push of mono 16-bit samples.
///
/// A write waits for room on the device and returns early once the session
/// that opened the sink is cancelled.
pub trait PlaybackSink {
    fn write(&mut self, samples: &[i16]) -> Result<(), PlaybackError>;
}

pub trait CaptureBackend: Send {
    fn name(&self) -> String;
    fn open(&self, params: &AudioParameters) -> Result<Box<dyn CaptureSource>>;
}

pub trait PlaybackBackend: Send {
    fn name(&self) -> String;
    fn open(&self, params: &AudioParameters, cancel: &CancelToken) -> Result<Box<dyn PlaybackSink>>;
}

//! Doppler bar chart: which bins to show, how tall, and what they mean.
//!
//! The scene is computed as plain data first and drawn afterwards, so the
//! layout rules can be checked without any drawing backend.

use serde::Serialize;

use super::velocity::RenderConfig;
use super::{DrawSurface, Rgba};
use crate::pipeline::Spectrum;

pub const BACKGROUND: Rgba = [0x04, 0x09, 0x47, 0xff];
pub const SIDEBAND: Rgba = [0xff, 0xff, 0x00, 0xff];
pub const LABEL: Rgba = [0x00, 0xff, 0x00, 0xff];
pub const MARKER: Rgba = [0xff, 0xff, 0xff, 0xff];

const MARKER_WIDTH: f32 = 2.0;
/// Bars shorter than this share of the height are not drawn.
const DRAW_THRESHOLD: f32 = 0.05;
/// Bars shorter than this share of the height are not labelled.
const LABEL_THRESHOLD: f32 = 0.10;
/// The central bin counts as this many times weaker when scaling.
const CENTRAL_COMPRESSION: f64 = 100.0;

/// Pixel geometry derived from the viewport size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Layout {
    pub width: f32,
    pub height: f32,
    pub stroke: f32,
    pub text_size: f32,
    pub step: f32,
    /// Harmonics shown on each side of the central one.
    pub half_span: usize,
}

impl Layout {
    pub fn new(width: u32, height: u32) -> Self {
        let width = width as f32;
        let height = height as f32;
        let stroke = width / 200.0;
        let step = 1.2 * stroke;
        let visible = if step > 0.0 {
            ((width - stroke * 2.0) / step).max(0.0) as usize
        } else {
            0
        };
        Self {
            width,
            height,
            stroke,
            text_size: height / 20.0,
            step,
            half_span: visible / 2,
        }
    }

    pub fn bar_x(&self, slot: usize) -> f32 {
        self.step + self.stroke + slot as f32 * self.step
    }

    /// Number of bar positions left of the right margin.
    pub fn slots(&self) -> usize {
        if self.step <= 0.0 {
            return 0;
        }
        let mut slots = 0;
        while self.bar_x(slots) < self.width - self.stroke {
            slots += 1;
        }
        slots
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bar {
    pub harmonic: usize,
    pub x: f32,
    pub amplitude: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub harmonic: usize,
    pub x: f32,
    pub y: f32,
    pub text: String,
}

/// Strongest sideband of one spectrum.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub seq: u64,
    pub harmonic: usize,
    pub frequency_hz: f64,
    pub velocity_m_s: f64,
    pub power: f64,
}

#[derive(Clone, Debug)]
pub struct SceneFrame {
    pub layout: Layout,
    pub scale: f64,
    pub central_power: f64,
    /// Where the central marker goes, if it is on screen.
    pub central_x: Option<f32>,
    pub bars: Vec<Bar>,
    pub labels: Vec<Label>,
    pub peak: Option<Reading>,
}

/// Pixels per unit of power.
///
/// Zero when no sideband carries energy. Otherwise the central bin only
/// counts at 1/100 of its power so a strong carrier does not flatten the
/// sidebands.
pub fn display_scale(max_power: f64, central_power: f64, drawable_height: f64) -> f64 {
    if max_power > 0.0 {
        drawable_height / max_power.max(central_power / CENTRAL_COMPRESSION)
    } else {
        0.0
    }
}

pub fn build_scene(spectrum: &Spectrum, config: &RenderConfig, width: u32, height: u32) -> SceneFrame {
    let layout = Layout::new(width, height);
    let central = config.central_harmonic;
    let first = central as i64 - layout.half_span as i64;
    let last = central as i64 + layout.half_span as i64;

    let mut central_power = 0.0;
    let mut max_power = 0.0;
    let mut max_harmonic = None;
    for harmonic in first.max(0)..last {
        let harmonic = harmonic as usize;
        let Some(power) = spectrum.power(harmonic) else {
            break;
        };
        if harmonic == central {
            central_power = power;
            continue;
        }
        if power > max_power {
            max_power = power;
            max_harmonic = Some(harmonic);
        }
    }

    let scale = display_scale(
        max_power,
        central_power,
        (layout.height - layout.text_size) as f64,
    );

    let mut central_x = None;
    let mut bars = Vec::new();
    let mut labels = Vec::new();
    for slot in 0..layout.slots() {
        let Ok(harmonic) = usize::try_from(first + slot as i64) else {
            continue;
        };
        let Some(power) = spectrum.power(harmonic) else {
            continue;
        };
        let x = layout.bar_x(slot);
        if harmonic == central {
            central_x = Some(x);
            continue;
        }

        let amplitude = (scale * power) as f32;
        if amplitude > layout.height * DRAW_THRESHOLD {
            bars.push(Bar {
                harmonic,
                x,
                amplitude,
            });
        }
        if amplitude > layout.height * LABEL_THRESHOLD {
            labels.push(Label {
                harmonic,
                x,
                y: layout.height - amplitude,
                text: format!(
                    "{:.2}Hz ({:.1} cm/s)",
                    config.harmonic_frequency(harmonic),
                    100.0 * config.velocity(harmonic)
                ),
            });
        }
    }

    let peak = max_harmonic.map(|harmonic| Reading {
        seq: spectrum.seq,
        harmonic,
        frequency_hz: config.harmonic_frequency(harmonic),
        velocity_m_s: config.velocity(harmonic),
        power: max_power,
    });

    SceneFrame {
        layout,
        scale,
        central_power,
        central_x,
        bars,
        labels,
        peak,
    }
}

pub fn draw_scene<S: DrawSurface>(scene: &SceneFrame, surface: &mut S) {
    let layout = &scene.layout;
    surface.clear(BACKGROUND);

    if let Some(x) = scene.central_x {
        surface.draw_vertical_line(x, layout.height, 0.0, MARKER, MARKER_WIDTH);
    }
    for bar in &scene.bars {
        surface.draw_vertical_line(
            bar.x,
            layout.height,
            layout.height - bar.amplitude,
            SIDEBAND,
            layout.stroke,
        );
    }
    for label in &scene.labels {
        surface.draw_text(&label.text, label.x, label.y, LABEL, layout.text_size);
    }
}

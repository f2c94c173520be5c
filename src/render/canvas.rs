use anyhow::Result;
use std::sync::Arc;

use super::text::TextOverlay;
use super::{DrawSurface, RenderSink, Rgba};
use crate::encode::ffmpeg::FfmpegEncoder;

/// Software RGBA surface.
pub struct PixelCanvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    text: Option<Arc<TextOverlay>>,
}

impl PixelCanvas {
    pub fn new(width: u32, height: u32, text: Option<Arc<TextOverlay>>) -> Self {
        Self::with_buffer(width, height, Vec::new(), text)
    }

    fn with_buffer(width: u32, height: u32, mut pixels: Vec<u8>, text: Option<Arc<TextOverlay>>) -> Self {
        pixels.resize((width * height * 4) as usize, 0);
        Self {
            width,
            height,
            pixels,
            text,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[cfg(test)]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 4) as usize;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[idx..idx + 4]);
        Some(px)
    }

    fn into_buffer(self) -> Vec<u8> {
        self.pixels
    }
}

impl DrawSurface for PixelCanvas {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn clear(&mut self, color: Rgba) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    fn draw_vertical_line(&mut self, x: f32, y0: f32, y1: f32, color: Rgba, width: f32) {
        let half = width.max(1.0) / 2.0;
        let left = ((x - half).round().max(0.0) as u32).min(self.width);
        let right = ((x + half).round().max(0.0) as u32).min(self.width);
        let top = y0.min(y1).round().max(0.0) as u32;
        let bottom = (y0.max(y1).round().max(0.0) as u32).min(self.height);

        for row in top..bottom {
            let start = ((row * self.width + left) * 4) as usize;
            let end = ((row * self.width + right.max(left)) * 4) as usize;
            for px in self.pixels[start..end].chunks_exact_mut(4) {
                px.copy_from_slice(&color);
            }
        }
    }

    fn draw_text(&mut self, text: &str, x: f32, y: f32, color: Rgba, size: f32) {
        if let Some(overlay) = &self.text {
            overlay.composite(
                &mut self.pixels,
                self.width,
                self.height,
                text,
                x.round() as i32,
                y.round() as i32,
                color,
                size,
            );
        }
    }
}

/// Renders into a reused pixel buffer and optionally records every frame.
pub struct CanvasSink {
    width: u32,
    height: u32,
    text: Option<Arc<TextOverlay>>,
    encoder: Option<FfmpegEncoder>,
    spare: Vec<u8>,
    frames: u64,
}

impl CanvasSink {
    pub fn new(width: u32, height: u32, text: Option<TextOverlay>, encoder: Option<FfmpegEncoder>) -> Self {
        if text.is_none() {
            log::warn!("No usable font found; velocity labels will not be drawn");
        }
        Self {
            width,
            height,
            text: text.map(Arc::new),
            encoder,
            spare: Vec::new(),
            frames: 0,
        }
    }

    #[cfg(test)]
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl RenderSink for CanvasSink {
    type Surface = PixelCanvas;

    fn begin_frame(&mut self) -> Option<PixelCanvas> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let buffer = std::mem::take(&mut self.spare);
        Some(PixelCanvas::with_buffer(
            self.width,
            self.height,
            buffer,
            self.text.clone(),
        ))
    }

    fn end_frame(&mut self, surface: PixelCanvas) -> Result<()> {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.write_frame(surface.pixels())?;
        }
        self.frames += 1;
        self.spare = surface.into_buffer();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            encoder.finish()?;
        }
        log::debug!("Canvas sink rendered {} frames", self.frames);
        Ok(())
    }
}

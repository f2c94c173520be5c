pub mod canvas;
pub mod scene;
pub mod text;
pub mod velocity;

use anyhow::Result;

pub type Rgba = [u8; 4];

/// Drawing calls a scene needs. Coordinates are pixels, origin top-left.
pub trait DrawSurface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn clear(&mut self, color: Rgba);
    /// Line from `(x, y0)` to `(x, y1)`, `width` pixels thick.
    fn draw_vertical_line(&mut self, x: f32, y0: f32, y1: f32, color: Rgba, width: f32);
    /// Text whose baseline starts at `(x, y)`.
    fn draw_text(&mut self, text: &str, x: f32, y: f32, color: Rgba, size: f32);
}

/// Where finished frames go.
pub trait RenderSink {
    type Surface: DrawSurface;

    /// A surface to draw the next frame on, or `None` to skip this frame.
    fn begin_frame(&mut self) -> Option<Self::Surface>;

    fn end_frame(&mut self, surface: Self::Surface) -> Result<()>;

    /// Flush and release outputs. Called once when rendering stops.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

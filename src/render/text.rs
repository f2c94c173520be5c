use anyhow::{Context, Result};
use fontdue::{Font, FontSettings};
use std::path::{Path, PathBuf};

pub struct TextOverlay {
    font: Font,
}

impl TextOverlay {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| anyhow::anyhow!("Failed to parse font: {}", e))?;
        Ok(Self { font })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font: {}", path.display()))?;
        Self::from_bytes(&bytes)
    }

    /// Composite text onto an RGBA pixel buffer with its baseline at `(x, baseline)`.
    pub fn composite(
        &self,
        pixels: &mut [u8],
        width: u32,
        height: u32,
        text: &str,
        x: i32,
        baseline: i32,
        color: [u8; 4],
        font_size: f32,
    ) {
        let mut cursor_x = x;
        for ch in text.chars() {
            let (metrics, bitmap) = self.font.rasterize(ch, font_size);
            let glyph_y = baseline - metrics.height as i32 - metrics.ymin;

            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let alpha = bitmap[gy * metrics.width + gx];
                    if alpha == 0 {
                        continue;
                    }

                    let px = cursor_x + gx as i32;
                    let py = glyph_y + gy as i32;

                    if px < 0 || py < 0 || px >= width as i32 || py >= height as i32 {
                        continue;
                    }

                    let idx = ((py as u32 * width + px as u32) * 4) as usize;
                    if idx + 3 >= pixels.len() {
                        continue;
                    }

                    let a = alpha as f32 / 255.0 * (color[3] as f32 / 255.0);
                    let inv_a = 1.0 - a;
                    pixels[idx] = (color[0] as f32 * a + pixels[idx] as f32 * inv_a) as u8;
                    pixels[idx + 1] = (color[1] as f32 * a + pixels[idx + 1] as f32 * inv_a) as u8;
                    pixels[idx + 2] = (color[2] as f32 * a + pixels[idx + 2] as f32 * inv_a) as u8;
                    pixels[idx + 3] = 255;
                }
            }

            cursor_x += metrics.advance_width as i32;
        }
    }
}

/// Download a font file, e.g. a hosted Liberation Mono.
pub fn load_font_from_url(url: &str) -> Result<Vec<u8>> {
    log::info!("Downloading font from {}", url);
    let response = reqwest::blocking::get(url)
        .with_context(|| format!("Failed to fetch font from {}", url))?
        .error_for_status()
        .with_context(|| format!("Font server rejected {}", url))?;
    let bytes = response.bytes().context("Failed to read font response")?;
    Ok(bytes.to_vec())
}

/// Monospace faces tried when no font is configured, best match first.
const MONOSPACE_FONTS: &[&str] = &[
    "LiberationMono-Regular.ttf",
    "DejaVuSansMono.ttf",
    "NotoSansMono-Regular.ttf",
    "Menlo.ttc",
    "consola.ttf",
];

fn font_dirs() -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Some(user) = dirs::font_dir() {
        found.push(user);
    }
    if let Some(home) = dirs::home_dir() {
        found.push(home.join(".fonts"));
    }
    for system in [
        "/usr/share/fonts/truetype/liberation",
        "/usr/share/fonts/liberation-mono",
        "/usr/share/fonts/TTF",
        "/usr/share/fonts/truetype/dejavu",
        "/usr/share/fonts/dejavu-sans-mono-fonts",
        "/usr/share/fonts/truetype/noto",
        "/System/Library/Fonts",
        "/Library/Fonts",
        "C:\\Windows\\Fonts",
    ] {
        found.push(PathBuf::from(system));
    }
    found
}

/// First of `names` present in any of `dirs`, preferring earlier names.
fn first_font(dirs: &[PathBuf], names: &[&str]) -> Option<PathBuf> {
    names
        .iter()
        .flat_map(|name| dirs.iter().map(move |dir| dir.join(name)))
        .find(|path| path.is_file())
}

/// An installed monospace font for labels, if one is in a well-known place.
pub fn find_system_font() -> Option<PathBuf> {
    first_font(&font_dirs(), MONOSPACE_FONTS)
}

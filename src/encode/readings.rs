use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::render::scene::Reading;

/// Appends one JSON object per rendered frame.
pub struct ReadingsWriter<W: Write> {
    out: W,
    written: u64,
}

impl ReadingsWriter<Box<dyn Write + Send>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create readings file: {}", path.display()))?;
        log::info!("Writing velocity readings to {}", path.display());
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }
}

impl<W: Write> ReadingsWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write(&mut self, reading: &Reading) -> Result<()> {
        serde_json::to_writer(&mut self.out, reading).context("Failed to encode reading")?;
        self.out.write_all(b"\n").context("Failed to write reading")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().context("Failed to flush readings")?;
        log::debug!("{} readings written", self.written);
        Ok(())
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

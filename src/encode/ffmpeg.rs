use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Pipes rendered RGBA frames into an ffmpeg process.
pub struct FfmpegEncoder {
    child: Child,
}

impl FfmpegEncoder {
    pub fn new(
        output_path: &Path,
        width: u32,
        height: u32,
        fps: f64,
        codec: &str,
        crf: u32,
    ) -> Result<Self> {
        let output = output_path
            .to_str()
            .context("Recording path is not valid UTF-8")?;
        let args = vec![
            "-y".to_string(),
            // stderr is only read at exit; keep it small for long recordings
            "-loglevel".into(), "error".into(),
            "-nostats".into(),
            "-f".into(), "rawvideo".into(),
            "-pixel_format".into(), "rgba".into(),
            "-video_size".into(), format!("{}x{}", width, height),
            "-framerate".into(), format!("{:.3}", fps),
            "-i".into(), "pipe:0".into(),
            "-c:v".into(), codec.to_string(),
            "-pix_fmt".into(), "yuv420p".into(),
            "-crf".into(), crf.to_string(),
            "-preset".into(), "veryfast".into(),
            output.to_string(),
        ];

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        log::info!(
            "Recording {}x{} @ {:.2}fps to {} (codec={})",
            width, height, fps, output_path.display(), codec
        );

        Ok(Self { child })
    }

    pub fn write_frame(&mut self, rgba_pixels: &[u8]) -> Result<()> {
        let stdin = self.child.stdin.as_mut().context("FFmpeg stdin not available")?;
        stdin.write_all(rgba_pixels).context("Failed to write frame to ffmpeg")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        // Close stdin to signal EOF
        drop(self.child.stdin.take());

        let output = self.child.wait_with_output().context("Failed to wait for ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("FFmpeg exited with error:\n{}", stderr);
        }

        log::info!("Recording complete");
        Ok(())
    }
}

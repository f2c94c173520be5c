use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "doppler", about = "Live Doppler velocity meter")]
pub struct Cli {
    /// Capture sample rate in Hz
    #[arg(long, default_value_t = 44100)]
    pub sample_rate: u32,

    /// Frequency of the emitted or expected tone in Hz
    #[arg(short = 'f', long, default_value_t = 10000)]
    pub central_freq: u32,

    /// Speed of sound in m/s
    #[arg(long, default_value_t = 340.0)]
    pub sound_speed: f64,

    /// Samples per analysis frame (a power of two is fastest)
    #[arg(short = 'n', long, default_value_t = 4096)]
    pub frame_size: usize,

    /// Measure sound reflected off a moving object instead of a moving source
    #[arg(short, long)]
    pub reflected: bool,

    /// Play the central frequency on the output device while measuring
    #[arg(short, long)]
    pub tone: bool,

    /// Do not play the tone, even in reflected mode
    #[arg(long, conflicts_with = "tone")]
    pub silent: bool,

    /// Replay an audio file (WAV, MP3, FLAC, OGG) instead of the microphone
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Start the input file over when it ends
    #[arg(long = "loop", requires = "input")]
    pub looping: bool,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 720)]
    pub height: u32,

    /// TTF/OTF font used for velocity labels (default: an installed monospace font)
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// Download the label font from this URL
    #[arg(long, conflicts_with = "font")]
    pub font_url: Option<String>,

    /// Record the rendered view to a video file through ffmpeg
    #[arg(long)]
    pub record: Option<PathBuf>,

    /// FFmpeg video codec for --record
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    /// H.264 CRF quality for --record (0-51, lower = better)
    #[arg(long, default_value_t = 23)]
    pub crf: u32,

    /// Append the peak reading of every frame to this file as JSON lines
    #[arg(long)]
    pub readings: Option<PathBuf>,

    /// Stop after this many seconds instead of waiting for Enter
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Config file (defaults to ./doppler.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the effective settings to this TOML file on exit
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

impl Cli {
    /// Reflected measurements need a tone, so it plays unless silenced.
    pub fn plays_tone(&self) -> bool {
        self.tone || (self.reflected && !self.silent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflected_mode_plays_tone_unless_silent() {
        let cli = Cli::parse_from(["doppler", "--reflected"]);
        assert!(cli.plays_tone());

        let cli = Cli::parse_from(["doppler", "-r", "--silent"]);
        assert!(!cli.plays_tone());

        let cli = Cli::parse_from(["doppler"]);
        assert!(!cli.plays_tone());
        assert_eq!(cli.frame_size, 4096);
    }

    #[test]
    fn loop_requires_input() {
        assert!(Cli::try_parse_from(["doppler", "--loop"]).is_err());
        let cli = Cli::try_parse_from(["doppler", "-i", "a.wav", "--loop"]).unwrap();
        assert!(cli.looping);
    }
}

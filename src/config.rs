use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::Cli;

/// Persisted settings. Every key is optional in the file.
#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub doppler: DopplerSettings,
    #[serde(default)]
    pub display: DisplaySettings,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct AudioSettings {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct DopplerSettings {
    #[serde(default = "default_central_freq")]
    pub central_freq: u32,
    #[serde(default = "default_sound_speed")]
    pub sound_speed: f64,
    #[serde(default)]
    pub reflected: bool,
    #[serde(default)]
    pub tone: bool,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct DisplaySettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_url: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frame_size: default_frame_size(),
        }
    }
}

impl Default for DopplerSettings {
    fn default() -> Self {
        Self {
            central_freq: default_central_freq(),
            sound_speed: default_sound_speed(),
            reflected: false,
            tone: false,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            font: None,
            font_url: None,
        }
    }
}

fn default_sample_rate() -> u32 { 44100 }
fn default_frame_size() -> usize { 4096 }
fn default_central_freq() -> u32 { 10000 }
fn default_sound_speed() -> f64 { 340.0 }
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }

impl Settings {
    /// Fill in CLI values that were left at their defaults.
    pub fn merge_into(self, cli: &mut Cli) {
        if cli.sample_rate == default_sample_rate() { cli.sample_rate = self.audio.sample_rate; }
        if cli.frame_size == default_frame_size() { cli.frame_size = self.audio.frame_size; }
        if cli.central_freq == default_central_freq() { cli.central_freq = self.doppler.central_freq; }
        if cli.sound_speed == default_sound_speed() { cli.sound_speed = self.doppler.sound_speed; }
        if !cli.reflected { cli.reflected = self.doppler.reflected; }
        if !cli.tone && !cli.silent { cli.tone = self.doppler.tone; }
        if cli.width == default_width() { cli.width = self.display.width; }
        if cli.height == default_height() { cli.height = self.display.height; }
        if cli.font.is_none() && cli.font_url.is_none() {
            cli.font = self.display.font;
            if cli.font.is_none() {
                cli.font_url = self.display.font_url;
            }
        }
    }

    /// The settings a run with these arguments would use.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            audio: AudioSettings {
                sample_rate: cli.sample_rate,
                frame_size: cli.frame_size,
            },
            doppler: DopplerSettings {
                central_freq: cli.central_freq,
                sound_speed: cli.sound_speed,
                reflected: cli.reflected,
                tone: cli.tone,
            },
            display: DisplaySettings {
                width: cli.width,
                height: cli.height,
                font: cli.font.clone(),
                font_url: cli.font_url.clone(),
            },
        }
    }
}

/// Explicit path first, then ./doppler.toml, then the user config dirs.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("doppler.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("doppler").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("doppler").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

pub fn load_config(path: &Path) -> Option<Settings> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(settings) => Some(settings),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

pub fn save_config(path: &Path, settings: &Settings) -> Result<()> {
    let content = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [doppler]
            central_freq = 18000
            reflected = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.doppler.central_freq, 18000);
        assert!(settings.doppler.reflected);
        assert_eq!(settings.doppler.sound_speed, 340.0);
        assert_eq!(settings.audio, AudioSettings::default());
    }

    #[test]
    fn explicit_cli_values_win() {
        let settings: Settings = toml::from_str(
            r#"
            [audio]
            sample_rate = 48000
            frame_size = 2048

            [display]
            width = 800
            font_url = "https://example.com/font.ttf"
            "#,
        )
        .unwrap();
        let mut cli = Cli::parse_from(["doppler", "--frame-size", "1024", "--width", "640"]);
        settings.merge_into(&mut cli);

        assert_eq!(cli.sample_rate, 48000);
        assert_eq!(cli.frame_size, 1024);
        assert_eq!(cli.width, 640);
        assert_eq!(cli.height, 720);
        assert_eq!(cli.font_url.as_deref(), Some("https://example.com/font.ttf"));
    }

    #[test]
    fn silent_flag_overrides_saved_tone() {
        let mut settings = Settings::default();
        settings.doppler.tone = true;
        let mut cli = Cli::parse_from(["doppler", "--silent"]);
        settings.merge_into(&mut cli);
        assert!(!cli.plays_tone());
    }

    #[test]
    fn saved_settings_load_back() {
        let dir = std::env::temp_dir().join(format!("doppler-config-{}", std::process::id()));
        let path = dir.join("config.toml");
        let cli = Cli::parse_from(["doppler", "-r", "-f", "17000", "--height", "480"]);
        let settings = Settings::from_cli(&cli);

        save_config(&path, &settings).unwrap();
        let loaded = load_config(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(loaded, settings);
        assert_eq!(loaded.doppler.central_freq, 17000);
    }

    #[test]
    fn explicit_path_is_used_as_is() {
        let path = Path::new("/nonexistent/doppler.toml");
        assert_eq!(find_config(Some(path)), Some(path.to_path_buf()));
        assert!(load_config(path).is_none());
    }
}

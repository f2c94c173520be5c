pub mod ffmpeg;
pub mod readings;

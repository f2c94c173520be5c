pub mod decode;
pub mod device;
pub mod fft;
pub mod params;
pub mod source;

//! Media processing primitives: on-disk path allocation, filename
//! sanitizing, and the ffmpeg transcode invoker with its normalization
//! profiles.

mod ffmpeg;
pub mod pathalloc;
mod profile;
mod sanitize;

pub use ffmpeg::{FfmpegTranscoder, Transcoder, TranscodeError};
pub use profile::{AudioProfile, VideoProfile};
pub use sanitize::sanitize_filename;

//! Normalization profiles: the exact argument lists handed to ffmpeg.
//!
//! Both profiles suppress the banner and anything below error-level so the
//! captured stderr is pure diagnostics, restructure containers for
//! progressive playback where relevant, and overwrite the output
//! unconditionally (`-y`) since the target path was freshly allocated.

use std::path::Path;

/// Re-encode a video container to streamable MP4.
#[derive(Debug, Clone)]
pub struct VideoProfile {
    pub codec: String,
    pub preset: String,
    pub crf: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl VideoProfile {
    pub fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-c:v".into(),
            self.codec.clone(),
            "-preset".into(),
            self.preset.clone(),
            "-crf".into(),
            self.crf.clone(),
            "-c:a".into(),
            self.audio_codec.clone(),
            "-b:a".into(),
            self.audio_bitrate.clone(),
            "-movflags".into(),
            "+faststart".into(),
            "-f".into(),
            "mp4".into(),
            "-y".into(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

/// Re-encode an audio file to MP3.
#[derive(Debug, Clone)]
pub struct AudioProfile {
    pub encoder: String,
    pub options: Vec<String>,
    pub sample_rate: Option<String>,
}

impl AudioProfile {
    pub fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-c:a".into(),
            self.encoder.clone(),
        ];
        args.extend(self.options.iter().cloned());
        if let Some(rate) = &self.sample_rate {
            args.push("-ar".into());
            args.push(rate.clone());
        }
        args.push("-f".into());
        args.push("mp3".into());
        args.push("-y".into());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

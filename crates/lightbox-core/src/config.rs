//! Environment-driven configuration.
//!
//! Every knob has a production-sensible default so a bare `.env` with just
//! `DATABASE_URL` is enough to run a worker. Format lists are comma-separated
//! lowercase extensions; an empty list disables that conversion path.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Video normalization settings (anything in `formats` is re-encoded to MP4).
#[derive(Debug, Clone)]
pub struct VideoConfig {
    pub codec: String,
    pub preset: String,
    pub crf: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub formats: HashSet<String>,
    /// Hard wall-clock limit on one ffmpeg invocation.
    pub timeout: Duration,
    /// Seed for exponential retry backoff.
    pub retry_base_delay: Duration,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".into(),
            preset: "veryslow".into(),
            crf: "16".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "320k".into(),
            formats: parse_format_list("mkv,mov,avi,wmv,flv"),
            timeout: Duration::from_secs(10_800),
            retry_base_delay: Duration::from_secs(120),
        }
    }
}

/// Audio normalization settings (anything in `formats` is re-encoded to MP3).
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub encoder: String,
    /// Extra encoder arguments, already split into tokens.
    pub options: Vec<String>,
    pub sample_rate: Option<String>,
    pub formats: HashSet<String>,
    pub timeout: Duration,
    pub retry_base_delay: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            encoder: "libmp3lame".into(),
            options: vec![
                "-q:a".into(),
                "0".into(),
                "-compression_level".into(),
                "0".into(),
            ],
            sample_rate: Some("44100".into()),
            formats: parse_format_list("wav,flac,m4a,aac,ogg,opus"),
            timeout: Duration::from_secs(3_600),
            retry_base_delay: Duration::from_secs(60),
        }
    }
}

/// Worker pool and retry budgets.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_workers: usize,
    /// Additional attempts after the first, per conversion job.
    pub max_retries: u32,
    /// Archive imports retry at most once as a whole.
    pub import_max_retries: u32,
    pub import_retry_base_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_retries: 3,
            import_max_retries: 1,
            import_retry_base_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ffmpeg_path: String,
    /// Root directory all batch directories and temp extraction areas live under.
    pub upload_root: PathBuf,
    pub database_url: String,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".into(),
            upload_root: PathBuf::from("static/uploads"),
            database_url: String::new(),
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let video = VideoConfig {
            codec: env_or("VIDEO_MP4_VIDEO_CODEC", &defaults.video.codec),
            preset: env_or("VIDEO_MP4_VIDEO_PRESET", &defaults.video.preset),
            crf: env_or("VIDEO_MP4_VIDEO_CRF", &defaults.video.crf),
            audio_codec: env_or("VIDEO_MP4_AUDIO_CODEC", &defaults.video.audio_codec),
            audio_bitrate: env_or("VIDEO_MP4_AUDIO_BITRATE", &defaults.video.audio_bitrate),
            formats: match std::env::var("VIDEO_FORMATS_TO_CONVERT_TO_MP4") {
                Ok(v) => parse_format_list(&v),
                Err(_) => defaults.video.formats,
            },
            timeout: env_duration_secs("VIDEO_TIMEOUT_SECONDS", defaults.video.timeout)?,
            retry_base_delay: env_duration_secs(
                "VIDEO_RETRY_BASE_DELAY_SECONDS",
                defaults.video.retry_base_delay,
            )?,
        };

        let audio = AudioConfig {
            encoder: env_or("AUDIO_MP3_ENCODER", &defaults.audio.encoder),
            options: match std::env::var("AUDIO_MP3_OPTIONS") {
                Ok(v) => v.split_whitespace().map(str::to_string).collect(),
                Err(_) => defaults.audio.options,
            },
            sample_rate: match std::env::var("AUDIO_MP3_SAMPLE_RATE") {
                Ok(v) if v.is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => defaults.audio.sample_rate,
            },
            formats: match std::env::var("AUDIO_FORMATS_TO_CONVERT_TO_MP3") {
                Ok(v) => parse_format_list(&v),
                Err(_) => defaults.audio.formats,
            },
            timeout: env_duration_secs("AUDIO_TIMEOUT_SECONDS", defaults.audio.timeout)?,
            retry_base_delay: env_duration_secs(
                "AUDIO_RETRY_BASE_DELAY_SECONDS",
                defaults.audio.retry_base_delay,
            )?,
        };

        let worker = WorkerConfig {
            max_workers: env_parsed("WORKER_MAX_WORKERS", defaults.worker.max_workers)?,
            max_retries: env_parsed("WORKER_MAX_RETRIES", defaults.worker.max_retries)?,
            import_max_retries: env_parsed(
                "WORKER_IMPORT_MAX_RETRIES",
                defaults.worker.import_max_retries,
            )?,
            import_retry_base_delay: env_duration_secs(
                "WORKER_IMPORT_RETRY_BASE_DELAY_SECONDS",
                defaults.worker.import_retry_base_delay,
            )?,
        };

        Ok(Self {
            ffmpeg_path: env_or("FFMPEG_PATH", &defaults.ffmpeg_path),
            upload_root: PathBuf::from(env_or(
                "UPLOAD_FOLDER",
                &defaults.upload_root.to_string_lossy(),
            )),
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            video,
            audio,
            worker,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {v:?}")),
        Err(_) => Ok(default),
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Result<Duration> {
    Ok(Duration::from_secs(env_parsed(
        key,
        default.as_secs(),
    )?))
}

/// Parse a comma-separated extension list; empty tokens are dropped, so an
/// empty or all-comma value yields an empty set (conversion disabled).
fn parse_format_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

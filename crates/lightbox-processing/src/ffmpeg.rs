//! Transcode invoker: runs the external ffmpeg binary with a hard timeout.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Subprocess ran but exited non-zero. Transient: retryable.
    #[error("transcoder exited with code {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },
    /// Subprocess exceeded the wall-clock limit and was killed. Transient.
    #[error("transcoder timed out after {0:?}")]
    TimedOut(Duration),
    /// Could not launch or wait on the subprocess at all. Fatal for the attempt.
    #[error("failed to run transcoder: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    /// Non-zero exits and timeouts are transient failure candidates; anything
    /// else is treated as fatal for the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TranscodeError::ExitStatus { .. } | TranscodeError::TimedOut(_)
        )
    }
}

/// Seam between jobs and the external transcoding executable.
/// Tests substitute a stub; production uses [`FfmpegTranscoder`].
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<(), TranscodeError>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: String) -> Result<Self> {
        // The path comes from configuration, not users, but it is handed to a
        // shell-adjacent API: refuse metacharacters outright.
        let dangerous = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
        if ffmpeg_path.chars().any(|c| dangerous.contains(&c)) {
            return Err(anyhow!(
                "ffmpeg path contains unsafe characters: {ffmpeg_path}"
            ));
        }
        Ok(Self { ffmpeg_path })
    }
}

async fn wait_capturing_stderr(child: &mut Child) -> std::io::Result<(std::process::ExitStatus, String)> {
    let mut stderr = String::new();
    if let Some(mut pipe) = child.stderr.take() {
        // Drain stderr before waiting so a chatty process cannot deadlock
        // on a full pipe.
        pipe.read_to_string(&mut stderr).await?;
    }
    let status = child.wait().await?;
    Ok((status, stderr))
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    #[tracing::instrument(skip(self, args), fields(ffmpeg_path = %self.ffmpeg_path))]
    async fn run(&self, args: &[String], timeout: Duration) -> Result<(), TranscodeError> {
        tracing::debug!(command = ?args, "executing ffmpeg");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match tokio::time::timeout(timeout, wait_capturing_stderr(&mut child)).await {
            Ok(Ok((status, stderr))) => {
                if status.success() {
                    Ok(())
                } else {
                    Err(TranscodeError::ExitStatus {
                        code: status.code().unwrap_or(-1),
                        stderr: stderr.trim().to_string(),
                    })
                }
            }
            Ok(Err(e)) => Err(TranscodeError::Io(e)),
            Err(_) => {
                tracing::warn!(timeout = ?timeout, "ffmpeg exceeded timeout, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(TranscodeError::TimedOut(timeout))
            }
        }
    }
}

//! Media conversion job: re-encode one temporary input to its normalized
//! container and finalize the item record.

use std::path::PathBuf;

use anyhow::anyhow;
use uuid::Uuid;

use lightbox_core::media_types::{AUDIO_NORMALIZED_MIME, VIDEO_NORMALIZED_MIME};
use lightbox_core::{truncated, JobError, MediaFinalize, ProcessingStatus, ERROR_MESSAGE_MAX};
use lightbox_processing::TranscodeError;

use crate::context::WorkerContext;
use crate::queue::JobKind;

#[derive(Debug, Clone, Copy)]
enum ConversionKind {
    Video,
    Audio,
}

impl ConversionKind {
    fn label(&self) -> &'static str {
        match self {
            ConversionKind::Video => "Video",
            ConversionKind::Audio => "Audio",
        }
    }
}

/// Converts one uploaded file. The source is a temporary input outside the
/// batch directory; the target was pre-allocated by the dispatcher so the
/// item's final name is fixed before the first attempt runs.
pub struct ConversionJob {
    pub media_id: Uuid,
    pub batch_id: Uuid,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub original_filename: String,
    /// `{owner}/{batch_id}` segment the final filepath is recorded under.
    pub batch_disk_segment: String,
    pub uploader: String,
    kind: ConversionKind,
    /// Status written by `cleanup` unless a later attempt replaces it. Starts
    /// as the catch-all failure so even a panic between attempts cannot leave
    /// the item looking successful.
    pending: MediaFinalize,
}

impl ConversionJob {
    #[allow(clippy::too_many_arguments)]
    fn new(
        kind: ConversionKind,
        media_id: Uuid,
        batch_id: Uuid,
        source_path: PathBuf,
        target_path: PathBuf,
        original_filename: String,
        batch_disk_segment: String,
        uploader: String,
    ) -> Self {
        let pending = MediaFinalize::failed(
            ProcessingStatus::Failed,
            format!("Unknown {} conversion error.", kind.label().to_lowercase()),
        );
        Self {
            media_id,
            batch_id,
            source_path,
            target_path,
            original_filename,
            batch_disk_segment,
            uploader,
            kind,
            pending,
        }
    }

    pub fn video(
        media_id: Uuid,
        batch_id: Uuid,
        source_path: PathBuf,
        target_path: PathBuf,
        original_filename: String,
        batch_disk_segment: String,
        uploader: String,
    ) -> Self {
        Self::new(
            ConversionKind::Video,
            media_id,
            batch_id,
            source_path,
            target_path,
            original_filename,
            batch_disk_segment,
            uploader,
        )
    }

    pub fn audio(
        media_id: Uuid,
        batch_id: Uuid,
        source_path: PathBuf,
        target_path: PathBuf,
        original_filename: String,
        batch_disk_segment: String,
        uploader: String,
    ) -> Self {
        Self::new(
            ConversionKind::Audio,
            media_id,
            batch_id,
            source_path,
            target_path,
            original_filename,
            batch_disk_segment,
            uploader,
        )
    }

    pub(crate) fn kind(&self) -> JobKind {
        match self.kind {
            ConversionKind::Video => JobKind::VideoConvert,
            ConversionKind::Audio => JobKind::AudioConvert,
        }
    }

    pub(crate) async fn execute(
        &mut self,
        context: &WorkerContext,
        attempt: u32,
    ) -> Result<(), JobError> {
        let label = self.kind.label();
        tracing::info!(
            media_id = %self.media_id,
            batch_id = %self.batch_id,
            original_filename = %self.original_filename,
            uploader = %self.uploader,
            attempt,
            job = self.kind().label(),
            "starting conversion"
        );

        let (args, timeout, mimetype) = match self.kind {
            ConversionKind::Video => (
                context
                    .video_profile()
                    .args(&self.source_path, &self.target_path),
                context.config.video.timeout,
                VIDEO_NORMALIZED_MIME,
            ),
            ConversionKind::Audio => (
                context
                    .audio_profile()
                    .args(&self.source_path, &self.target_path),
                context.config.audio.timeout,
                AUDIO_NORMALIZED_MIME,
            ),
        };

        match context.transcoder.run(&args, timeout).await {
            Ok(()) => {
                let final_name = self
                    .target_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let filepath = format!("{}/{final_name}", self.batch_disk_segment);
                self.pending =
                    MediaFinalize::completed(final_name, filepath, mimetype.to_string());

                // Publish success immediately; cleanup re-applies the same
                // update, so a store hiccup here is retried once more there.
                match context.store.finalize_media(self.media_id, &self.pending).await {
                    Ok(applied) => tracing::info!(
                        media_id = %self.media_id,
                        applied,
                        "conversion succeeded"
                    ),
                    Err(err) => tracing::error!(
                        media_id = %self.media_id,
                        error = %err,
                        "conversion succeeded but status write failed, deferring to cleanup"
                    ),
                }
                Ok(())
            }
            Err(TranscodeError::ExitStatus { code, stderr }) => {
                let message = format!("{label} conversion error (rc {code}): {stderr}");
                self.pending = MediaFinalize::failed(
                    ProcessingStatus::Failed,
                    truncated(&message, ERROR_MESSAGE_MAX),
                );
                Err(JobError::recoverable(anyhow!(message)))
            }
            Err(TranscodeError::TimedOut(limit)) => {
                self.pending = MediaFinalize::failed(
                    ProcessingStatus::Failed,
                    format!("{label} conversion timeout."),
                );
                Err(JobError::recoverable(anyhow!(
                    "{label} conversion exceeded the {}s limit",
                    limit.as_secs()
                )))
            }
            Err(err) => {
                self.pending = MediaFinalize::failed(
                    ProcessingStatus::Failed,
                    truncated(&format!("Unexpected error: {err}"), 100),
                );
                Err(JobError::unrecoverable(err))
            }
        }
    }

    pub(crate) async fn cleanup(&mut self, context: &WorkerContext) {
        match context.store.finalize_media(self.media_id, &self.pending).await {
            Ok(true) => tracing::info!(
                media_id = %self.media_id,
                status = %self.pending.status,
                "final status recorded"
            ),
            Ok(false) => tracing::debug!(
                media_id = %self.media_id,
                "item already finalized or deleted, skipping status write"
            ),
            Err(err) => tracing::error!(
                media_id = %self.media_id,
                error = %err,
                "CRITICAL: failed to record final status"
            ),
        }

        match tokio::fs::remove_file(&self.source_path).await {
            Ok(()) => tracing::info!(
                path = %self.source_path.display(),
                "removed temporary input"
            ),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::error!(
                path = %self.source_path.display(),
                error = %err,
                "failed to remove temporary input"
            ),
        }
    }
}

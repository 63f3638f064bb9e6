//! Archive import job: extract an uploaded ZIP into an isolated directory,
//! classify every entry, register the resulting items in one batched append
//! and fan out conversion jobs for entries that need normalizing.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use uuid::Uuid;
use zip::result::ZipError;

use lightbox_core::{
    media_types, truncated, ImportManifest, ItemKind, JobError, MediaFinalize, MediaItem,
    ProcessingStatus, MANIFEST_FILENAME,
};
use lightbox_processing::{pathalloc, sanitize_filename};

use crate::context::WorkerContext;
use crate::jobs::{ConversionJob, Job};

/// Imports one uploaded archive into its batch. The archive file itself is
/// already registered as an `ArchiveImport` tracking item; this job drives
/// that item from `QueuedImport` to its terminal import status.
pub struct ArchiveImportJob {
    pub archive_path: PathBuf,
    pub batch_id: Uuid,
    pub uploader: String,
    /// Original archive filename, the key the tracking item is looked up by.
    pub archive_filename: String,
    tracking_id: Option<Uuid>,
    extract_dir: Option<PathBuf>,
    pending: MediaFinalize,
}

impl ArchiveImportJob {
    pub fn new(
        archive_path: PathBuf,
        batch_id: Uuid,
        uploader: impl Into<String>,
        archive_filename: impl Into<String>,
    ) -> Self {
        Self {
            archive_path,
            batch_id,
            uploader: uploader.into(),
            archive_filename: archive_filename.into(),
            tracking_id: None,
            extract_dir: None,
            pending: MediaFinalize::failed(
                ProcessingStatus::FailedImport,
                "Unknown archive import error.",
            ),
        }
    }

    /// Record a transient infrastructure failure: the truncated message is
    /// staged for the tracking item and the error is marked retryable.
    fn infra_failure(&mut self, context: &str, err: impl std::fmt::Display) -> JobError {
        self.pending = MediaFinalize::failed(
            ProcessingStatus::FailedImport,
            truncated(&format!("Import error: {err}"), 100),
        );
        JobError::recoverable(anyhow!("{context}: {err}"))
    }

    pub(crate) async fn execute(
        &mut self,
        context: &WorkerContext,
        attempt: u32,
    ) -> Result<(), JobError> {
        tracing::info!(
            batch_id = %self.batch_id,
            archive = %self.archive_filename,
            uploader = %self.uploader,
            attempt,
            "starting archive import"
        );

        // A retried attempt starts from a fresh extraction directory.
        if let Some(stale) = self.extract_dir.take() {
            let _ = tokio::fs::remove_dir_all(&stale).await;
        }

        self.tracking_id = context
            .store
            .import_tracker(self.batch_id, &self.archive_filename)
            .await
            .map_err(|err| self.infra_failure("import tracker lookup failed", err))?;
        if self.tracking_id.is_none() {
            tracing::warn!(
                batch_id = %self.batch_id,
                archive = %self.archive_filename,
                "no tracking item registered for archive, proceeding without status updates"
            );
        }

        let batch = context
            .store
            .get_batch(self.batch_id)
            .await
            .map_err(|err| self.infra_failure("batch lookup failed", err))?;
        let Some(batch) = batch else {
            self.pending = MediaFinalize::failed(
                ProcessingStatus::FailedImport,
                "Batch owner not found.",
            );
            return Err(JobError::unrecoverable(anyhow!(
                "batch {} does not exist or has no owner",
                self.batch_id
            )));
        };

        let owner = batch.owner_user_id;
        let segment = format!("{owner}/{}", self.batch_id);
        let batch_dir = context
            .config
            .upload_root
            .join(&owner)
            .join(self.batch_id.to_string());
        tokio::fs::create_dir_all(&batch_dir)
            .await
            .map_err(|err| self.infra_failure("creating batch directory failed", err))?;

        let extract_base = context.config.upload_root.join("temp_archive_extracts");
        let extract_dir = extract_base.join(format!(
            "import_{}_{}",
            self.batch_id,
            Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&extract_dir)
            .await
            .map_err(|err| self.infra_failure("creating extraction directory failed", err))?;
        self.extract_dir = Some(extract_dir.clone());

        // ZIP decoding is synchronous; keep it off the runtime threads.
        let archive_path = self.archive_path.clone();
        let target_dir = extract_dir.clone();
        let extraction =
            tokio::task::spawn_blocking(move || extract_archive(&archive_path, &target_dir))
                .await
                .map_err(|err| self.infra_failure("extraction task failed", err))?;

        let (manifest, entries) = match extraction {
            Ok(result) => result,
            Err(ExtractError::Corrupt(err)) => {
                self.pending = MediaFinalize::failed(
                    ProcessingStatus::FailedImport,
                    "Corrupted archive.",
                );
                return Err(JobError::unrecoverable(anyhow!(
                    "archive {} is corrupted: {err}",
                    self.archive_filename
                )));
            }
            Err(ExtractError::Io(err)) => {
                self.pending = MediaFinalize::failed(
                    ProcessingStatus::FailedImport,
                    truncated(&format!("Import error: {err}"), 100),
                );
                // Partial extraction: do not retry the whole archive.
                return Err(JobError::unrecoverable(anyhow!(
                    "extracting {} failed: {err}",
                    self.archive_filename
                )));
            }
        };

        // The extraction directory is removed when this job finishes, so
        // conversion inputs are staged in a separate temp area that each
        // conversion job cleans up itself.
        let staging_dir = context.config.upload_root.join("temp_processing");
        tokio::fs::create_dir_all(&staging_dir)
            .await
            .map_err(|err| self.infra_failure("creating staging directory failed", err))?;

        let mut items: Vec<MediaItem> = Vec::with_capacity(entries.len());
        let mut fan_out: Vec<Job> = Vec::new();
        let mut media_count = 0usize;
        let mut blob_count = 0usize;

        for entry in entries {
            let meta = manifest.as_ref().and_then(|m| m.lookup(&entry.zip_path));
            let original_filename = meta
                .and_then(|m| m.original_filename.clone())
                .unwrap_or_else(|| entry.zip_path.clone());
            let (stem, ext) = media_types::split_extension(&original_filename);

            let id = Uuid::new_v4();
            let mut item = MediaItem::new(
                id,
                original_filename.clone(),
                media_types::mime_for_extension(&ext),
                self.uploader.clone(),
                self.batch_id,
            );
            if let Some(meta) = meta {
                item.description = meta.description.clone().unwrap_or_default();
                item.is_hidden = meta.is_hidden;
            }

            let sane_stem = {
                let cleaned = sanitize_filename(stem);
                if cleaned.is_empty() {
                    format!("media_{}", &id.simple().to_string()[..8])
                } else {
                    cleaned
                }
            };

            let needs_video = context.config.video.formats.contains(&ext);
            let needs_audio = context.config.audio.formats.contains(&ext);
            if needs_video || needs_audio {
                let target_ext = if needs_video { ".mp4" } else { ".mp3" };
                let (target_path, _) = pathalloc::allocate(&batch_dir, &sane_stem, target_ext)
                    .await
                    .map_err(|err| self.infra_failure("allocating conversion target failed", err))?;

                let temp_name = entry
                    .temp_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let staged_path = staging_dir.join(format!("{}_{temp_name}", id.simple()));
                move_file(&entry.temp_path, &staged_path)
                    .await
                    .map_err(|err| self.infra_failure("staging conversion input failed", err))?;

                let conversion = if needs_video {
                    ConversionJob::video(
                        id,
                        self.batch_id,
                        staged_path,
                        target_path,
                        original_filename,
                        segment.clone(),
                        self.uploader.clone(),
                    )
                } else {
                    ConversionJob::audio(
                        id,
                        self.batch_id,
                        staged_path,
                        target_path,
                        original_filename,
                        segment.clone(),
                        self.uploader.clone(),
                    )
                };
                fan_out.push(Job::Convert(conversion));
                items.push(item);
                media_count += 1;
            } else {
                let ext_with_dot = if ext.is_empty() {
                    String::new()
                } else {
                    format!(".{ext}")
                };
                let (final_path, final_name) =
                    pathalloc::allocate(&batch_dir, &sane_stem, &ext_with_dot)
                        .await
                        .map_err(|err| self.infra_failure("allocating final path failed", err))?;
                move_file(&entry.temp_path, &final_path)
                    .await
                    .map_err(|err| self.infra_failure("moving extracted file failed", err))?;

                item.filename_on_disk = final_name.clone();
                item.filepath = format!("{segment}/{final_name}");
                item.status = ProcessingStatus::Completed;
                if media_types::is_processable_media(&ext) {
                    media_count += 1;
                } else {
                    item.kind = ItemKind::Blob;
                    blob_count += 1;
                }
                items.push(item);
            }
        }

        // One batched append so the membership list gains all ids at once,
        // and only after that do the conversions start: a conversion must
        // never finish before its item record exists.
        context
            .store
            .append_batch_items(self.batch_id, &items)
            .await
            .map_err(|err| self.infra_failure("registering imported items failed", err))?;
        let conversions = fan_out.len();
        for job in fan_out {
            context.enqueue(job);
        }

        tracing::info!(
            batch_id = %self.batch_id,
            archive = %self.archive_filename,
            media = media_count,
            blobs = blob_count,
            conversions,
            "archive import finished"
        );

        self.pending = MediaFinalize::status_only(ProcessingStatus::CompletedImport);
        if let Some(tracking_id) = self.tracking_id {
            match context.store.finalize_media(tracking_id, &self.pending).await {
                Ok(applied) => tracing::info!(
                    media_id = %tracking_id,
                    applied,
                    "import tracking item finalized"
                ),
                Err(err) => tracing::error!(
                    media_id = %tracking_id,
                    error = %err,
                    "import succeeded but tracking status write failed, deferring to cleanup"
                ),
            }
        }
        Ok(())
    }

    pub(crate) async fn cleanup(&mut self, context: &WorkerContext) {
        if let Some(tracking_id) = self.tracking_id {
            match context.store.finalize_media(tracking_id, &self.pending).await {
                Ok(true) => tracing::info!(
                    media_id = %tracking_id,
                    status = %self.pending.status,
                    "import status recorded"
                ),
                Ok(false) => tracing::debug!(
                    media_id = %tracking_id,
                    "tracking item already finalized or deleted, skipping status write"
                ),
                Err(err) => tracing::error!(
                    media_id = %tracking_id,
                    error = %err,
                    "CRITICAL: failed to record import status"
                ),
            }
        }

        if let Some(dir) = self.extract_dir.take() {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => tracing::info!(
                    path = %dir.display(),
                    "removed extraction directory"
                ),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => tracing::error!(
                    path = %dir.display(),
                    error = %err,
                    "failed to remove extraction directory"
                ),
            }
        }

        if let Err(err) = context
            .store
            .remove_import_tracker(self.batch_id, &self.archive_filename)
            .await
        {
            tracing::error!(
                batch_id = %self.batch_id,
                archive = %self.archive_filename,
                error = %err,
                "failed to remove import tracker"
            );
        }
    }
}

#[derive(Debug)]
enum ExtractError {
    /// The archive itself is unreadable. Permanent.
    Corrupt(ZipError),
    /// The filesystem failed mid-extraction.
    Io(std::io::Error),
}

struct ExtractedEntry {
    /// Path of the entry inside the archive, the manifest lookup key.
    zip_path: String,
    temp_path: PathBuf,
}

fn classify_zip_error(err: ZipError) -> ExtractError {
    match err {
        ZipError::Io(io) => ExtractError::Io(io),
        other => ExtractError::Corrupt(other),
    }
}

/// Extract regular-file entries into `extract_dir` and parse the optional
/// manifest. Directory entries, macOS resource forks, the manifest document
/// itself and anything whose name would resolve outside the extraction
/// directory are skipped.
fn extract_archive(
    archive_path: &Path,
    extract_dir: &Path,
) -> Result<(Option<ImportManifest>, Vec<ExtractedEntry>), ExtractError> {
    let file = std::fs::File::open(archive_path).map_err(ExtractError::Io)?;
    let mut archive = zip::ZipArchive::new(file).map_err(classify_zip_error)?;

    let manifest = match archive.by_name(MANIFEST_FILENAME) {
        Ok(mut entry) => {
            let mut raw = String::new();
            match entry.read_to_string(&mut raw) {
                Ok(_) => match serde_json::from_str::<ImportManifest>(&raw) {
                    Ok(manifest) => {
                        tracing::info!(entries = manifest.files.len(), "import manifest loaded");
                        Some(manifest)
                    }
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "import manifest is malformed, falling back to in-archive names"
                        );
                        None
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "import manifest unreadable, ignoring it");
                    None
                }
            }
        }
        Err(_) => None,
    };

    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(classify_zip_error)?;
        let zip_path = entry.name().to_string();

        if entry.is_dir() || zip_path.ends_with('/') {
            continue;
        }
        if zip_path == MANIFEST_FILENAME || zip_path.starts_with("__MACOSX") {
            continue;
        }
        if entry.enclosed_name().is_none() {
            tracing::error!(entry = %zip_path, "entry escapes the extraction directory, skipping");
            continue;
        }

        let basename = sanitize_filename(&zip_path);
        if basename.is_empty() {
            tracing::warn!(entry = %zip_path, "entry name unusable after sanitizing, skipping");
            continue;
        }

        let temp_path = unique_extract_path(extract_dir, &basename);
        if !temp_path.starts_with(extract_dir) {
            tracing::error!(entry = %zip_path, "entry escapes the extraction directory, skipping");
            continue;
        }

        let mut out = std::fs::File::create(&temp_path).map_err(ExtractError::Io)?;
        std::io::copy(&mut entry, &mut out).map_err(ExtractError::Io)?;
        entries.push(ExtractedEntry {
            zip_path,
            temp_path,
        });
    }

    Ok((manifest, entries))
}

/// Entries from different archive subdirectories can share a basename; probe
/// for a free temp name so a later entry never clobbers an earlier one.
fn unique_extract_path(extract_dir: &Path, basename: &str) -> PathBuf {
    let candidate = extract_dir.join(basename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = media_types::split_extension(basename);
    let ext_with_dot = if ext.is_empty() {
        String::new()
    } else {
        format!(".{ext}")
    };
    let mut counter = 1u32;
    loop {
        let candidate = extract_dir.join(format!("{stem}_{counter}{ext_with_dot}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        // Rename fails across filesystems; fall back to copy + remove.
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

//! End-to-end pipeline tests: jobs run through the real queue against an
//! in-memory state store and a stub transcoder.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use lightbox_core::{Batch, Config, ItemKind, MediaItem, ProcessingStatus};
use lightbox_processing::{TranscodeError, Transcoder};
use lightbox_store::{MemoryStateStore, StateStore};
use lightbox_worker::{ArchiveImportJob, ConversionJob, Job, JobQueue};

enum StubBehavior {
    /// Pretend to transcode: write a small output file.
    Succeed,
    /// Always exit non-zero with the given stderr.
    FailExit { code: i32, stderr: String },
}

struct StubTranscoder {
    behavior: StubBehavior,
    invocations: AtomicU32,
}

impl StubTranscoder {
    fn succeeding() -> Self {
        Self {
            behavior: StubBehavior::Succeed,
            invocations: AtomicU32::new(0),
        }
    }

    fn failing(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            behavior: StubBehavior::FailExit {
                code,
                stderr: stderr.into(),
            },
            invocations: AtomicU32::new(0),
        }
    }

    fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn run(&self, args: &[String], _timeout: Duration) -> Result<(), TranscodeError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            StubBehavior::Succeed => {
                let output = args.last().cloned().unwrap_or_default();
                tokio::fs::write(&output, b"transcoded")
                    .await
                    .map_err(TranscodeError::Io)?;
                Ok(())
            }
            StubBehavior::FailExit { code, stderr } => Err(TranscodeError::ExitStatus {
                code: *code,
                stderr: stderr.clone(),
            }),
        }
    }
}

fn test_config(upload_root: &Path) -> Config {
    let mut config = Config::default();
    config.upload_root = upload_root.to_path_buf();
    config.video.retry_base_delay = Duration::from_millis(10);
    config.audio.retry_base_delay = Duration::from_millis(10);
    config.worker.import_retry_base_delay = Duration::from_millis(10);
    config
}

async fn wait_for_status(
    store: &MemoryStateStore,
    id: Uuid,
    expected: ProcessingStatus,
) -> MediaItem {
    for _ in 0..500 {
        if let Some(item) = store.get_media(id).await.unwrap() {
            if item.status == expected {
                return item;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("item {id} never reached {expected:?}");
}

/// Success status lands before the job's cleanup removes its temp input, so
/// file-removal assertions poll instead of checking immediately.
async fn wait_for_removal(path: &Path) {
    for _ in 0..500 {
        if !path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} was never removed", path.display());
}

async fn wait_for_empty_dir(path: &Path) {
    for _ in 0..500 {
        match std::fs::read_dir(path) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => panic!("reading {}: {err}", path.display()),
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never emptied", path.display());
}

async fn wait_for_tracker_removal(store: &MemoryStateStore, batch_id: Uuid, archive: &str) {
    for _ in 0..500 {
        if store
            .import_tracker(batch_id, archive)
            .await
            .unwrap()
            .is_none()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("import tracker for {archive} was never removed");
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default();
    for (name, body) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap();
}

/// Register the archive tracking item and its import tracker, the way the
/// upload front door does before dispatching the import job.
async fn register_archive(
    store: &MemoryStateStore,
    batch_id: Uuid,
    owner: &str,
    archive_filename: &str,
) -> Uuid {
    let tracking_id = Uuid::new_v4();
    let mut tracking = MediaItem::new(
        tracking_id,
        archive_filename,
        "application/zip",
        owner,
        batch_id,
    );
    tracking.kind = ItemKind::ArchiveImport;
    tracking.status = ProcessingStatus::QueuedImport;
    tracking.filename_on_disk = archive_filename.to_string();
    tracking.filepath = format!("{owner}/{batch_id}/{archive_filename}");
    store.append_batch_item(batch_id, &tracking).await.unwrap();
    store
        .set_import_tracker(batch_id, archive_filename, tracking_id)
        .await
        .unwrap();
    tracking_id
}

#[tokio::test]
async fn video_conversion_completes_and_removes_the_temp_input() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let stub = Arc::new(StubTranscoder::succeeding());
    let queue = JobQueue::start(
        store.clone(),
        stub.clone(),
        Arc::new(test_config(root.path())),
    );

    let batch_id = Uuid::new_v4();
    let media_id = Uuid::new_v4();
    let item = MediaItem::new(
        media_id,
        "Holiday Clip.mkv",
        "video/x-matroska",
        "alice",
        batch_id,
    );
    store.put_media(&item).await.unwrap();

    let batch_dir = root.path().join("alice").join(batch_id.to_string());
    tokio::fs::create_dir_all(&batch_dir).await.unwrap();
    let source = root.path().join("upload_tmp.mkv");
    tokio::fs::write(&source, b"raw video").await.unwrap();
    let target = batch_dir.join("Holiday_Clip.mp4");

    queue.submit(Job::Convert(ConversionJob::video(
        media_id,
        batch_id,
        source.clone(),
        target.clone(),
        "Holiday Clip.mkv".into(),
        format!("alice/{batch_id}"),
        "alice".into(),
    )));

    let item = wait_for_status(&store, media_id, ProcessingStatus::Completed).await;
    assert_eq!(item.filename_on_disk, "Holiday_Clip.mp4");
    assert_eq!(item.filepath, format!("alice/{batch_id}/Holiday_Clip.mp4"));
    assert_eq!(item.mimetype, "video/mp4");
    assert_eq!(item.error_message, "");
    assert!(target.exists());
    wait_for_removal(&source).await;
    assert_eq!(stub.invocations(), 1);
}

#[tokio::test]
async fn failing_audio_conversion_exhausts_retries_and_records_a_bounded_error() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    // Chatty stderr: the persisted message must be truncated.
    let stub = Arc::new(StubTranscoder::failing(1, "e".repeat(400)));
    let queue = JobQueue::start(
        store.clone(),
        stub.clone(),
        Arc::new(test_config(root.path())),
    );

    let batch_id = Uuid::new_v4();
    let media_id = Uuid::new_v4();
    let item = MediaItem::new(media_id, "take1.wav", "audio/wav", "bob", batch_id);
    store.put_media(&item).await.unwrap();

    let batch_dir = root.path().join("bob").join(batch_id.to_string());
    tokio::fs::create_dir_all(&batch_dir).await.unwrap();
    let source = root.path().join("upload_tmp.wav");
    tokio::fs::write(&source, b"raw audio").await.unwrap();

    queue.submit(Job::Convert(ConversionJob::audio(
        media_id,
        batch_id,
        source.clone(),
        batch_dir.join("take1.mp3"),
        "take1.wav".into(),
        format!("bob/{batch_id}"),
        "bob".into(),
    )));

    let item = wait_for_status(&store, media_id, ProcessingStatus::Failed).await;
    assert!(item.error_message.starts_with("Audio conversion error (rc 1):"));
    assert!(item.error_message.chars().count() <= 200);
    // Disk fields were never set: the item stays unservable.
    assert_eq!(item.filename_on_disk, "");
    assert_eq!(item.filepath, "");
    // First attempt plus three retries, temp input removed only at the end.
    assert_eq!(stub.invocations(), 4);
    wait_for_removal(&source).await;
}

#[tokio::test]
async fn archive_import_applies_manifest_metadata_and_imports_unlisted_entries() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let stub = Arc::new(StubTranscoder::succeeding());
    let queue = JobQueue::start(
        store.clone(),
        stub.clone(),
        Arc::new(test_config(root.path())),
    );

    let batch_id = Uuid::new_v4();
    store
        .create_batch(&Batch::new(batch_id, "alice", "imported"))
        .await
        .unwrap();
    let tracking_id = register_archive(&store, batch_id, "alice", "export.zip").await;

    let manifest = br#"{"files": [{"zip_path": "photos/cat.jpg", "original_filename": "Mr Cat.jpg", "description": "the cat", "is_hidden": true}]}"#;
    let archive_path = root.path().join("export.zip");
    write_zip(
        &archive_path,
        &[
            ("lightbox_manifest.json", manifest as &[u8]),
            ("photos/cat.jpg", b"jpeg bytes"),
            ("docs/report.pdf", b"pdf bytes"),
        ],
    );

    queue.submit(Job::Import(ArchiveImportJob::new(
        archive_path.clone(),
        batch_id,
        "alice",
        "export.zip",
    )));

    wait_for_status(&store, tracking_id, ProcessingStatus::CompletedImport).await;

    let ids = store.batch_media_ids(batch_id).await.unwrap();
    assert_eq!(ids.len(), 3); // tracking item + two imported entries
    assert_eq!(ids[0], tracking_id);

    let cat = store.get_media(ids[1]).await.unwrap().unwrap();
    assert_eq!(cat.original_filename, "Mr Cat.jpg");
    assert_eq!(cat.description, "the cat");
    assert!(cat.is_hidden);
    assert_eq!(cat.kind, ItemKind::Media);
    assert_eq!(cat.status, ProcessingStatus::Completed);
    assert_eq!(cat.mimetype, "image/jpeg");
    assert_eq!(cat.filename_on_disk, "Mr_Cat.jpg");
    assert!(root
        .path()
        .join("alice")
        .join(batch_id.to_string())
        .join("Mr_Cat.jpg")
        .exists());

    // Unlisted entry falls back to its in-archive path as the original name.
    let report = store.get_media(ids[2]).await.unwrap().unwrap();
    assert_eq!(report.original_filename, "docs/report.pdf");
    assert_eq!(report.kind, ItemKind::Media);
    assert_eq!(report.status, ProcessingStatus::Completed);
    assert_eq!(report.filename_on_disk, "report.pdf");

    // Tracker gone, extraction area cleaned, archive file left in place.
    wait_for_tracker_removal(&store, batch_id, "export.zip").await;
    wait_for_empty_dir(&root.path().join("temp_archive_extracts")).await;
    assert!(archive_path.exists());
}

#[tokio::test]
async fn archive_import_fans_out_conversions_for_video_entries() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let stub = Arc::new(StubTranscoder::succeeding());
    let queue = JobQueue::start(
        store.clone(),
        stub.clone(),
        Arc::new(test_config(root.path())),
    );

    let batch_id = Uuid::new_v4();
    store
        .create_batch(&Batch::new(batch_id, "carol", "clips"))
        .await
        .unwrap();
    let tracking_id = register_archive(&store, batch_id, "carol", "clips.zip").await;

    let archive_path = root.path().join("clips.zip");
    write_zip(&archive_path, &[("clip.mkv", b"matroska bytes" as &[u8])]);

    queue.submit(Job::Import(ArchiveImportJob::new(
        archive_path,
        batch_id,
        "carol",
        "clips.zip",
    )));

    wait_for_status(&store, tracking_id, ProcessingStatus::CompletedImport).await;
    let ids = store.batch_media_ids(batch_id).await.unwrap();
    assert_eq!(ids.len(), 2);

    let clip = wait_for_status(&store, ids[1], ProcessingStatus::Completed).await;
    assert_eq!(clip.original_filename, "clip.mkv");
    assert_eq!(clip.filename_on_disk, "clip.mp4");
    assert_eq!(clip.mimetype, "video/mp4");
    assert_eq!(clip.filepath, format!("carol/{batch_id}/clip.mp4"));
    assert!(root
        .path()
        .join("carol")
        .join(batch_id.to_string())
        .join("clip.mp4")
        .exists());
    assert_eq!(stub.invocations(), 1);

    // The staged conversion input was cleaned up by the conversion job.
    wait_for_empty_dir(&root.path().join("temp_processing")).await;
}

#[tokio::test]
async fn archive_import_skips_traversal_entries() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let queue = JobQueue::start(
        store.clone(),
        Arc::new(StubTranscoder::succeeding()),
        Arc::new(test_config(root.path())),
    );

    let batch_id = Uuid::new_v4();
    store
        .create_batch(&Batch::new(batch_id, "dave", "mixed"))
        .await
        .unwrap();
    let tracking_id = register_archive(&store, batch_id, "dave", "mixed.zip").await;

    let archive_path = root.path().join("mixed.zip");
    write_zip(
        &archive_path,
        &[
            ("../escape.sh", b"#!/bin/sh" as &[u8]),
            ("fine.png", b"png bytes"),
        ],
    );

    queue.submit(Job::Import(ArchiveImportJob::new(
        archive_path,
        batch_id,
        "dave",
        "mixed.zip",
    )));

    wait_for_status(&store, tracking_id, ProcessingStatus::CompletedImport).await;
    let ids = store.batch_media_ids(batch_id).await.unwrap();
    assert_eq!(ids.len(), 2); // tracking item + fine.png only
    let imported = store.get_media(ids[1]).await.unwrap().unwrap();
    assert_eq!(imported.original_filename, "fine.png");
    assert!(!root.path().join("escape.sh").exists());
}

#[tokio::test]
async fn empty_archive_still_completes_the_import() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let queue = JobQueue::start(
        store.clone(),
        Arc::new(StubTranscoder::succeeding()),
        Arc::new(test_config(root.path())),
    );

    let batch_id = Uuid::new_v4();
    store
        .create_batch(&Batch::new(batch_id, "erin", "empty"))
        .await
        .unwrap();
    let tracking_id = register_archive(&store, batch_id, "erin", "empty.zip").await;

    let archive_path = root.path().join("empty.zip");
    write_zip(&archive_path, &[]);

    queue.submit(Job::Import(ArchiveImportJob::new(
        archive_path,
        batch_id,
        "erin",
        "empty.zip",
    )));

    let tracking = wait_for_status(&store, tracking_id, ProcessingStatus::CompletedImport).await;
    assert_eq!(tracking.error_message, "");
    // Disk fields on the tracking item survive the status-only update.
    assert_eq!(tracking.filename_on_disk, "empty.zip");
    assert_eq!(store.batch_media_ids(batch_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn corrupted_archive_fails_the_import_permanently() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let queue = JobQueue::start(
        store.clone(),
        Arc::new(StubTranscoder::succeeding()),
        Arc::new(test_config(root.path())),
    );

    let batch_id = Uuid::new_v4();
    store
        .create_batch(&Batch::new(batch_id, "frank", "broken"))
        .await
        .unwrap();
    let tracking_id = register_archive(&store, batch_id, "frank", "broken.zip").await;

    let archive_path = root.path().join("broken.zip");
    tokio::fs::write(&archive_path, b"definitely not a zip")
        .await
        .unwrap();

    queue.submit(Job::Import(ArchiveImportJob::new(
        archive_path,
        batch_id,
        "frank",
        "broken.zip",
    )));

    let tracking = wait_for_status(&store, tracking_id, ProcessingStatus::FailedImport).await;
    assert_eq!(tracking.error_message, "Corrupted archive.");
    assert_eq!(store.batch_media_ids(batch_id).await.unwrap().len(), 1);
    wait_for_tracker_removal(&store, batch_id, "broken.zip").await;
    wait_for_empty_dir(&root.path().join("temp_archive_extracts")).await;
}

#[tokio::test]
async fn import_into_a_missing_batch_reports_the_owner_error() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let queue = JobQueue::start(
        store.clone(),
        Arc::new(StubTranscoder::succeeding()),
        Arc::new(test_config(root.path())),
    );

    // Tracking item exists but the batch record does not.
    let batch_id = Uuid::new_v4();
    let tracking_id = register_archive(&store, batch_id, "ghost", "orphan.zip").await;

    let archive_path = root.path().join("orphan.zip");
    write_zip(&archive_path, &[("a.jpg", b"img" as &[u8])]);

    queue.submit(Job::Import(ArchiveImportJob::new(
        archive_path,
        batch_id,
        "ghost",
        "orphan.zip",
    )));

    let tracking = wait_for_status(&store, tracking_id, ProcessingStatus::FailedImport).await;
    assert_eq!(tracking.error_message, "Batch owner not found.");
}

#[tokio::test]
async fn a_deleted_item_is_not_resurrected_by_a_late_finalize() {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStateStore::new());
    let stub = Arc::new(StubTranscoder::succeeding());
    let queue = JobQueue::start(
        store.clone(),
        stub.clone(),
        Arc::new(test_config(root.path())),
    );

    let batch_id = Uuid::new_v4();
    let media_id = Uuid::new_v4();
    // The item was deleted before the conversion ran; nothing to update.
    let batch_dir = root.path().join("alice").join(batch_id.to_string());
    tokio::fs::create_dir_all(&batch_dir).await.unwrap();
    let source = root.path().join("upload_tmp.mkv");
    tokio::fs::write(&source, b"raw").await.unwrap();

    queue.submit(Job::Convert(ConversionJob::video(
        media_id,
        batch_id,
        source.clone(),
        batch_dir.join("gone.mp4"),
        "gone.mkv".into(),
        format!("alice/{batch_id}"),
        "alice".into(),
    )));

    // The temp input disappearing marks the end of the job.
    wait_for_removal(&source).await;
    assert!(store.get_media(media_id).await.unwrap().is_none());
}

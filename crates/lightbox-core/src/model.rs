//! Batch and media item records, status state machine, import manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the optional metadata document inside an imported archive.
pub const MANIFEST_FILENAME: &str = "lightbox_manifest.json";

/// What kind of thing a `MediaItem` record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Viewable media (image, video, audio, pdf).
    Media,
    /// Opaque stored file, download-only.
    Blob,
    /// The uploaded archive itself; its status tracks the aggregate import.
    ArchiveImport,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Media => "media",
            ItemKind::Blob => "blob",
            ItemKind::ArchiveImport => "archive_import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "media" => Some(ItemKind::Media),
            "blob" => Some(ItemKind::Blob),
            "archive_import" => Some(ItemKind::ArchiveImport),
            _ => None,
        }
    }
}

/// Processing status of a media item.
///
/// `Queued`/`QueuedImport` are the only non-terminal states; there is no
/// persisted "processing" state; observers read the absence of a terminal
/// status as in-flight. The reconciliation rule (`is_success`) guards
/// terminal writes: a stale `Failed` from a superseded attempt must never
/// overwrite a `Completed` written by a faster attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Queued,
    QueuedImport,
    Completed,
    CompletedImport,
    Failed,
    FailedImport,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Queued => "queued",
            ProcessingStatus::QueuedImport => "queued_import",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::CompletedImport => "completed_import",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::FailedImport => "failed_import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ProcessingStatus::Queued),
            "queued_import" => Some(ProcessingStatus::QueuedImport),
            "completed" => Some(ProcessingStatus::Completed),
            "completed_import" => Some(ProcessingStatus::CompletedImport),
            "failed" => Some(ProcessingStatus::Failed),
            "failed_import" => Some(ProcessingStatus::FailedImport),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ProcessingStatus::Queued | ProcessingStatus::QueuedImport
        )
    }

    /// True for the terminal success states the finalization guard protects.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::CompletedImport
        )
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded or derived file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: Uuid,
    pub original_filename: String,
    /// Final on-disk name; empty while only a temporary input exists.
    pub filename_on_disk: String,
    /// Path relative to the upload root; empty while only a temporary input exists.
    pub filepath: String,
    pub mimetype: String,
    pub kind: ItemKind,
    pub status: ProcessingStatus,
    pub error_message: String,
    pub description: String,
    pub is_hidden: bool,
    pub is_liked: bool,
    pub uploader_user_id: String,
    pub batch_id: Uuid,
    pub uploaded_at: DateTime<Utc>,
}

impl MediaItem {
    /// A fresh `Media` item with empty disk fields and `Queued` status.
    /// Callers adjust `kind`/`status`/paths before persisting.
    pub fn new(
        id: Uuid,
        original_filename: impl Into<String>,
        mimetype: impl Into<String>,
        uploader_user_id: impl Into<String>,
        batch_id: Uuid,
    ) -> Self {
        Self {
            id,
            original_filename: original_filename.into(),
            filename_on_disk: String::new(),
            filepath: String::new(),
            mimetype: mimetype.into(),
            kind: ItemKind::Media,
            status: ProcessingStatus::Queued,
            error_message: String::new(),
            description: String::new(),
            is_hidden: false,
            is_liked: false,
            uploader_user_id: uploader_user_id.into(),
            batch_id,
            uploaded_at: Utc::now(),
        }
    }
}

/// A named, ordered, user-owned collection of media items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub owner_user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub is_shared: bool,
    pub share_token: Option<String>,
}

impl Batch {
    pub fn new(id: Uuid, owner_user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            owner_user_id: owner_user_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            last_modified_at: None,
            is_shared: false,
            share_token: None,
        }
    }
}

/// Disk fields written together with a successful terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalFile {
    pub filename_on_disk: String,
    pub filepath: String,
    pub mimetype: String,
}

/// The atomic terminal update a job applies to an item.
///
/// All fields land in one store write so observers never see a half-updated
/// record. `file` is `None` for status-only updates (failures, import
/// tracking items); the store leaves the existing disk fields untouched.
#[derive(Debug, Clone)]
pub struct MediaFinalize {
    pub status: ProcessingStatus,
    pub error_message: String,
    pub file: Option<FinalFile>,
}

impl MediaFinalize {
    pub fn completed(filename_on_disk: String, filepath: String, mimetype: String) -> Self {
        Self {
            status: ProcessingStatus::Completed,
            error_message: String::new(),
            file: Some(FinalFile {
                filename_on_disk,
                filepath,
                mimetype,
            }),
        }
    }

    pub fn failed(status: ProcessingStatus, error_message: impl Into<String>) -> Self {
        Self {
            status,
            error_message: error_message.into(),
            file: None,
        }
    }

    pub fn status_only(status: ProcessingStatus) -> Self {
        Self {
            status,
            error_message: String::new(),
            file: None,
        }
    }
}

/// Optional manifest embedded in an archive, describing its entries.
///
/// Produced by the batch export feature; absence or corruption is non-fatal
/// on import, the in-archive path is used as the original filename instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportManifest {
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub zip_path: String,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_hidden: bool,
}

impl ImportManifest {
    pub fn lookup(&self, zip_path: &str) -> Option<&ManifestEntry> {
        self.files.iter().find(|e| e.zip_path == zip_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ProcessingStatus::Queued,
            ProcessingStatus::QueuedImport,
            ProcessingStatus::Completed,
            ProcessingStatus::CompletedImport,
            ProcessingStatus::Failed,
            ProcessingStatus::FailedImport,
        ] {
            assert_eq!(ProcessingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProcessingStatus::parse("running"), None);
    }

    #[test]
    fn only_queued_states_are_non_terminal() {
        assert!(!ProcessingStatus::Queued.is_terminal());
        assert!(!ProcessingStatus::QueuedImport.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(ProcessingStatus::CompletedImport.is_terminal());
    }

    #[test]
    fn guard_protects_only_successes() {
        assert!(ProcessingStatus::Completed.is_success());
        assert!(ProcessingStatus::CompletedImport.is_success());
        assert!(!ProcessingStatus::Failed.is_success());
        assert!(!ProcessingStatus::Queued.is_success());
    }

    #[test]
    fn manifest_tolerates_missing_optional_fields() {
        let manifest: ImportManifest = serde_json::from_str(
            r#"{"files": [{"zip_path": "photos/cat.jpg"}]}"#,
        )
        .unwrap();
        let entry = manifest.lookup("photos/cat.jpg").unwrap();
        assert!(entry.original_filename.is_none());
        assert!(!entry.is_hidden);
        assert!(manifest.lookup("missing").is_none());
    }
}

//! LightBox core: domain models, media-type classification and configuration.
//!
//! Everything here is shared between the state store, the processing crate and
//! the worker: the `MediaItem`/`Batch` records, the closed status enums the
//! reconciliation rule is checked against, the extension/MIME tables driving
//! ingestion classification, and the env-driven `Config`.

mod config;
mod job_error;
pub mod media_types;
mod model;

pub use config::{AudioConfig, Config, VideoConfig, WorkerConfig};
pub use job_error::JobError;
pub use model::{
    Batch, FinalFile, ImportManifest, ItemKind, ManifestEntry, MediaFinalize, MediaItem,
    ProcessingStatus, MANIFEST_FILENAME,
};

/// Upper bound on the diagnostic text persisted to an item record.
pub const ERROR_MESSAGE_MAX: usize = 200;

/// Truncate a diagnostic string to at most `max` characters.
///
/// Error messages persisted to item records are bounded so the ledger record
/// size stays predictable regardless of how chatty the transcoder was.
pub fn truncated(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

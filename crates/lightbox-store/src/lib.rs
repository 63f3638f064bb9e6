//! Item State Store: the single shared mutable ledger for media items and
//! batches.
//!
//! Jobs receive a store client as an explicit dependency; all multi-field
//! mutations of one record go through atomic record writes, and bulk appends
//! during an archive import go through one batched write. The store is also
//! where the reconciliation rule lives: [`StateStore::finalize_media`] skips
//! the write when the item already carries a terminal success, so a stale
//! retry can never clobber a finished result.
//!
//! Two backends: [`MemoryStateStore`] for tests and single-node use, and
//! [`PgStateStore`] for deployments.

mod memory;
mod postgres;

pub use memory::MemoryStateStore;
pub use postgres::PgStateStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use lightbox_core::{Batch, MediaFinalize, MediaItem};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt record for {key}: {detail}")]
    CorruptRecord { key: String, detail: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Write a full item record atomically, creating or replacing it.
    async fn put_media(&self, item: &MediaItem) -> StoreResult<()>;

    async fn get_media(&self, id: Uuid) -> StoreResult<Option<MediaItem>>;

    /// Reconciliation-guarded terminal write.
    ///
    /// Applies `update` atomically unless the item's current status is
    /// already a terminal success, or the item no longer exists (it may
    /// have been deleted while the job was in flight). Returns `true` when
    /// the update was applied, `false` when it was skipped.
    async fn finalize_media(&self, id: Uuid, update: &MediaFinalize) -> StoreResult<bool>;

    /// Remove an item record, its entry in the batch's ordered list, and any
    /// import tracker correlated to it. Idempotent.
    async fn delete_media(&self, id: Uuid) -> StoreResult<()>;

    async fn create_batch(&self, batch: &Batch) -> StoreResult<()>;

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<Batch>>;

    async fn touch_batch(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Persist one item and append its id to the batch's ordered list.
    async fn append_batch_item(&self, batch_id: Uuid, item: &MediaItem) -> StoreResult<()> {
        self.append_batch_items(batch_id, std::slice::from_ref(item))
            .await
    }

    /// Persist many items and append their ids, in order, as a single
    /// batched write (one transaction / one lock acquisition). Best-effort
    /// atomicity: a reader never sees a partially appended list.
    async fn append_batch_items(&self, batch_id: Uuid, items: &[MediaItem]) -> StoreResult<()>;

    /// The batch's append-ordered item ids (insertion order = display order).
    async fn batch_media_ids(&self, batch_id: Uuid) -> StoreResult<Vec<Uuid>>;

    /// Remove the batch, its id list, its items, their import trackers and
    /// the share-token index entry. Idempotent; tolerates in-flight jobs
    /// (their later guarded finalizations become no-ops).
    async fn delete_batch(&self, id: Uuid) -> StoreResult<()>;

    /// Correlate an in-flight archive import with the item tracking it.
    async fn set_import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
        media_id: Uuid,
    ) -> StoreResult<()>;

    async fn import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
    ) -> StoreResult<Option<Uuid>>;

    async fn remove_import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
    ) -> StoreResult<()>;

    /// Reverse index from share token to batch id. Owned by the sharing
    /// feature, but `delete_batch` must invalidate it.
    async fn set_share_token(&self, token: &str, batch_id: Uuid) -> StoreResult<()>;

    async fn resolve_share_token(&self, token: &str) -> StoreResult<Option<Uuid>>;
}

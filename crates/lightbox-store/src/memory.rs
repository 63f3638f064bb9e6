//! In-process state store backed by a single `RwLock`.
//!
//! Record writes are atomic by construction (one lock, one map entry) and a
//! batched append holds the write lock for the whole batch, so readers see
//! either none or all of an import's ids.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use lightbox_core::{Batch, ItemKind, MediaFinalize, MediaItem};

use crate::{StateStore, StoreResult};

#[derive(Default)]
struct Inner {
    media: HashMap<Uuid, MediaItem>,
    batches: HashMap<Uuid, Batch>,
    batch_items: HashMap<Uuid, Vec<Uuid>>,
    import_trackers: HashMap<(Uuid, String), Uuid>,
    share_tokens: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_finalize(item: &mut MediaItem, update: &MediaFinalize) {
    if let Some(file) = &update.file {
        item.filename_on_disk = file.filename_on_disk.clone();
        item.filepath = file.filepath.clone();
        item.mimetype = file.mimetype.clone();
    }
    item.status = update.status;
    item.error_message = update.error_message.clone();
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put_media(&self, item: &MediaItem) -> StoreResult<()> {
        self.inner.write().await.media.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_media(&self, id: Uuid) -> StoreResult<Option<MediaItem>> {
        Ok(self.inner.read().await.media.get(&id).cloned())
    }

    async fn finalize_media(&self, id: Uuid, update: &MediaFinalize) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.media.get_mut(&id) {
            Some(item) if item.status.is_success() => Ok(false),
            Some(item) => {
                apply_finalize(item, update);
                Ok(true)
            }
            // Deleted while the job was in flight: documented race, no-op.
            None => Ok(false),
        }
    }

    async fn delete_media(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(item) = inner.media.remove(&id) {
            if let Some(ids) = inner.batch_items.get_mut(&item.batch_id) {
                ids.retain(|existing| *existing != id);
            }
            if item.kind == ItemKind::ArchiveImport {
                inner
                    .import_trackers
                    .remove(&(item.batch_id, item.original_filename.clone()));
            }
        }
        Ok(())
    }

    async fn create_batch(&self, batch: &Batch) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.batches.insert(batch.id, batch.clone());
        inner.batch_items.entry(batch.id).or_default();
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<Batch>> {
        Ok(self.inner.read().await.batches.get(&id).cloned())
    }

    async fn touch_batch(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(batch) = self.inner.write().await.batches.get_mut(&id) {
            batch.last_modified_at = Some(at);
        }
        Ok(())
    }

    async fn append_batch_items(&self, batch_id: Uuid, items: &[MediaItem]) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        for item in items {
            inner.media.insert(item.id, item.clone());
        }
        let ids = inner.batch_items.entry(batch_id).or_default();
        ids.extend(items.iter().map(|item| item.id));
        Ok(())
    }

    async fn batch_media_ids(&self, batch_id: Uuid) -> StoreResult<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .await
            .batch_items
            .get(&batch_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_batch(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(ids) = inner.batch_items.remove(&id) {
            for media_id in ids {
                inner.media.remove(&media_id);
            }
        }
        inner.media.retain(|_, item| item.batch_id != id);
        inner.import_trackers.retain(|(batch, _), _| *batch != id);
        if let Some(batch) = inner.batches.remove(&id) {
            if let Some(token) = batch.share_token {
                inner.share_tokens.remove(&token);
            }
        }
        Ok(())
    }

    async fn set_import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
        media_id: Uuid,
    ) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .import_trackers
            .insert((batch_id, archive_filename.to_string()), media_id);
        Ok(())
    }

    async fn import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
    ) -> StoreResult<Option<Uuid>> {
        Ok(self
            .inner
            .read()
            .await
            .import_trackers
            .get(&(batch_id, archive_filename.to_string()))
            .copied())
    }

    async fn remove_import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
    ) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .import_trackers
            .remove(&(batch_id, archive_filename.to_string()));
        Ok(())
    }

    async fn set_share_token(&self, token: &str, batch_id: Uuid) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .share_tokens
            .insert(token.to_string(), batch_id);
        Ok(())
    }

    async fn resolve_share_token(&self, token: &str) -> StoreResult<Option<Uuid>> {
        Ok(self.inner.read().await.share_tokens.get(token).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightbox_core::ProcessingStatus;

    fn item(batch_id: Uuid) -> MediaItem {
        MediaItem::new(
            Uuid::new_v4(),
            "clip.mkv",
            "video/x-matroska",
            "alice",
            batch_id,
        )
    }

    #[tokio::test]
    async fn finalize_applies_terminal_update_atomically() {
        let store = MemoryStateStore::new();
        let batch_id = Uuid::new_v4();
        let media = item(batch_id);
        store.put_media(&media).await.unwrap();

        let update = MediaFinalize::completed(
            "clip.mp4".into(),
            "alice/batch/clip.mp4".into(),
            "video/mp4".into(),
        );
        assert!(store.finalize_media(media.id, &update).await.unwrap());

        let stored = store.get_media(media.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.filename_on_disk, "clip.mp4");
        assert_eq!(stored.mimetype, "video/mp4");
        assert_eq!(stored.error_message, "");
    }

    #[tokio::test]
    async fn stale_failure_cannot_overwrite_a_success() {
        let store = MemoryStateStore::new();
        let media = item(Uuid::new_v4());
        store.put_media(&media).await.unwrap();

        let success = MediaFinalize::completed("a.mp4".into(), "u/b/a.mp4".into(), "video/mp4".into());
        assert!(store.finalize_media(media.id, &success).await.unwrap());

        let stale = MediaFinalize::failed(ProcessingStatus::Failed, "late retry");
        assert!(!store.finalize_media(media.id, &stale).await.unwrap());

        let stored = store.get_media(media.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
        assert_eq!(stored.error_message, "");
    }

    #[tokio::test]
    async fn a_retry_may_overwrite_a_failure_with_a_success() {
        let store = MemoryStateStore::new();
        let media = item(Uuid::new_v4());
        store.put_media(&media).await.unwrap();

        let failure = MediaFinalize::failed(ProcessingStatus::Failed, "rc 1");
        assert!(store.finalize_media(media.id, &failure).await.unwrap());

        let success = MediaFinalize::completed("a.mp4".into(), "u/b/a.mp4".into(), "video/mp4".into());
        assert!(store.finalize_media(media.id, &success).await.unwrap());
        let stored = store.get_media(media.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProcessingStatus::Completed);
    }

    #[tokio::test]
    async fn finalize_after_delete_is_a_noop() {
        let store = MemoryStateStore::new();
        let update = MediaFinalize::failed(ProcessingStatus::Failed, "orphan write");
        assert!(!store.finalize_media(Uuid::new_v4(), &update).await.unwrap());
    }

    #[tokio::test]
    async fn status_only_update_keeps_disk_fields() {
        let store = MemoryStateStore::new();
        let mut media = item(Uuid::new_v4());
        media.filename_on_disk = "archive.zip".into();
        media.filepath = "alice/b/archive.zip".into();
        store.put_media(&media).await.unwrap();

        let update = MediaFinalize::status_only(ProcessingStatus::CompletedImport);
        assert!(store.finalize_media(media.id, &update).await.unwrap());
        let stored = store.get_media(media.id).await.unwrap().unwrap();
        assert_eq!(stored.filename_on_disk, "archive.zip");
        assert_eq!(stored.filepath, "alice/b/archive.zip");
        assert_eq!(stored.status, ProcessingStatus::CompletedImport);
    }

    #[tokio::test]
    async fn appended_ids_keep_insertion_order() {
        let store = MemoryStateStore::new();
        let batch_id = Uuid::new_v4();
        let items: Vec<_> = (0..5).map(|_| item(batch_id)).collect();
        store.append_batch_items(batch_id, &items).await.unwrap();

        let ids = store.batch_media_ids(batch_id).await.unwrap();
        assert_eq!(ids, items.iter().map(|i| i.id).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn delete_batch_removes_items_trackers_and_share_token() {
        let store = MemoryStateStore::new();
        let batch_id = Uuid::new_v4();
        let mut batch = Batch::new(batch_id, "alice", "holiday");
        batch.is_shared = true;
        batch.share_token = Some("tok123".into());
        store.create_batch(&batch).await.unwrap();
        store.set_share_token("tok123", batch_id).await.unwrap();

        let media = item(batch_id);
        store.append_batch_item(batch_id, &media).await.unwrap();
        store
            .set_import_tracker(batch_id, "export.zip", media.id)
            .await
            .unwrap();

        store.delete_batch(batch_id).await.unwrap();

        assert!(store.get_batch(batch_id).await.unwrap().is_none());
        assert!(store.get_media(media.id).await.unwrap().is_none());
        assert!(store.batch_media_ids(batch_id).await.unwrap().is_empty());
        assert!(store
            .import_tracker(batch_id, "export.zip")
            .await
            .unwrap()
            .is_none());
        assert!(store.resolve_share_token("tok123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_media_removes_list_entry_and_tracker() {
        let store = MemoryStateStore::new();
        let batch_id = Uuid::new_v4();
        let mut archive = item(batch_id);
        archive.kind = ItemKind::ArchiveImport;
        archive.original_filename = "import.zip".into();
        store.append_batch_item(batch_id, &archive).await.unwrap();
        store
            .set_import_tracker(batch_id, "import.zip", archive.id)
            .await
            .unwrap();

        store.delete_media(archive.id).await.unwrap();
        assert!(store.batch_media_ids(batch_id).await.unwrap().is_empty());
        assert!(store
            .import_tracker(batch_id, "import.zip")
            .await
            .unwrap()
            .is_none());
    }
}

//! Postgres-backed state store.
//!
//! Queries are runtime-bound; batched appends and multi-record deletes run
//! inside one transaction. The reconciliation guard is a conditional UPDATE
//! so the check and the write are one statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use lightbox_core::{Batch, ItemKind, MediaFinalize, MediaItem, ProcessingStatus};

use crate::{StateStore, StoreError, StoreResult};

#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("state store migrations applied");
        Ok(())
    }
}

fn media_from_row(row: &PgRow) -> StoreResult<MediaItem> {
    let id: Uuid = row.try_get("id").map_err(StoreError::Database)?;
    let kind_raw: String = row.try_get("kind")?;
    let status_raw: String = row.try_get("status")?;
    let kind = ItemKind::parse(&kind_raw).ok_or_else(|| StoreError::CorruptRecord {
        key: format!("media:{id}"),
        detail: format!("unknown kind {kind_raw:?}"),
    })?;
    let status = ProcessingStatus::parse(&status_raw).ok_or_else(|| StoreError::CorruptRecord {
        key: format!("media:{id}"),
        detail: format!("unknown status {status_raw:?}"),
    })?;

    Ok(MediaItem {
        id,
        original_filename: row.try_get("original_filename")?,
        filename_on_disk: row.try_get("filename_on_disk")?,
        filepath: row.try_get("filepath")?,
        mimetype: row.try_get("mimetype")?,
        kind,
        status,
        error_message: row.try_get("error_message")?,
        description: row.try_get("description")?,
        is_hidden: row.try_get("is_hidden")?,
        is_liked: row.try_get("is_liked")?,
        uploader_user_id: row.try_get("uploader_user_id")?,
        batch_id: row.try_get("batch_id")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn batch_from_row(row: &PgRow) -> StoreResult<Batch> {
    Ok(Batch {
        id: row.try_get("id")?,
        owner_user_id: row.try_get("owner_user_id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        last_modified_at: row.try_get("last_modified_at")?,
        is_shared: row.try_get("is_shared")?,
        share_token: row.try_get("share_token")?,
    })
}

async fn upsert_media<'e, E>(executor: E, item: &MediaItem) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO media_items (
            id, original_filename, filename_on_disk, filepath, mimetype,
            kind, status, error_message, description, is_hidden, is_liked,
            uploader_user_id, batch_id, uploaded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (id) DO UPDATE SET
            original_filename = EXCLUDED.original_filename,
            filename_on_disk = EXCLUDED.filename_on_disk,
            filepath = EXCLUDED.filepath,
            mimetype = EXCLUDED.mimetype,
            kind = EXCLUDED.kind,
            status = EXCLUDED.status,
            error_message = EXCLUDED.error_message,
            description = EXCLUDED.description,
            is_hidden = EXCLUDED.is_hidden,
            is_liked = EXCLUDED.is_liked,
            uploader_user_id = EXCLUDED.uploader_user_id,
            batch_id = EXCLUDED.batch_id,
            uploaded_at = EXCLUDED.uploaded_at
        "#,
    )
    .bind(item.id)
    .bind(&item.original_filename)
    .bind(&item.filename_on_disk)
    .bind(&item.filepath)
    .bind(&item.mimetype)
    .bind(item.kind.as_str())
    .bind(item.status.as_str())
    .bind(&item.error_message)
    .bind(&item.description)
    .bind(item.is_hidden)
    .bind(item.is_liked)
    .bind(&item.uploader_user_id)
    .bind(item.batch_id)
    .bind(item.uploaded_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn put_media(&self, item: &MediaItem) -> StoreResult<()> {
        upsert_media(&self.pool, item).await?;
        Ok(())
    }

    async fn get_media(&self, id: Uuid) -> StoreResult<Option<MediaItem>> {
        let row = sqlx::query("SELECT * FROM media_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(media_from_row).transpose()
    }

    async fn finalize_media(&self, id: Uuid, update: &MediaFinalize) -> StoreResult<bool> {
        // The guard and the write are one statement: a row already in a
        // terminal success state (or deleted) matches zero rows.
        let result = sqlx::query(
            r#"
            UPDATE media_items SET
                filename_on_disk = COALESCE($2, filename_on_disk),
                filepath = COALESCE($3, filepath),
                mimetype = COALESCE($4, mimetype),
                status = $5,
                error_message = $6
            WHERE id = $1 AND status NOT IN ('completed', 'completed_import')
            "#,
        )
        .bind(id)
        .bind(update.file.as_ref().map(|f| f.filename_on_disk.as_str()))
        .bind(update.file.as_ref().map(|f| f.filepath.as_str()))
        .bind(update.file.as_ref().map(|f| f.mimetype.as_str()))
        .bind(update.status.as_str())
        .bind(&update.error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_media(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM media_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(());
        };
        let item = media_from_row(&row)?;

        sqlx::query("DELETE FROM batch_media_ids WHERE media_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if item.kind == ItemKind::ArchiveImport {
            sqlx::query(
                "DELETE FROM import_trackers WHERE batch_id = $1 AND archive_filename = $2",
            )
            .bind(item.batch_id)
            .bind(&item.original_filename)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query("DELETE FROM media_items WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(media_id = %id, "media item deleted");
        Ok(())
    }

    async fn create_batch(&self, batch: &Batch) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (
                id, owner_user_id, name, created_at, last_modified_at,
                is_shared, share_token
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(batch.id)
        .bind(&batch.owner_user_id)
        .bind(&batch.name)
        .bind(batch.created_at)
        .bind(batch.last_modified_at)
        .bind(batch.is_shared)
        .bind(batch.share_token.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<Batch>> {
        let row = sqlx::query("SELECT * FROM batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(batch_from_row).transpose()
    }

    async fn touch_batch(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE batches SET last_modified_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_batch_items(&self, batch_id: Uuid, items: &[MediaItem]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            upsert_media(&mut *tx, item).await?;
            sqlx::query("INSERT INTO batch_media_ids (batch_id, media_id) VALUES ($1, $2)")
                .bind(batch_id)
                .bind(item.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn batch_media_ids(&self, batch_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT media_id FROM batch_media_ids WHERE batch_id = $1 ORDER BY seq",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("media_id").map_err(StoreError::Database))
            .collect()
    }

    async fn delete_batch(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM import_trackers WHERE batch_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM batch_media_ids WHERE batch_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM media_items WHERE batch_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM share_tokens WHERE batch_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM batches WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(batch_id = %id, "batch and dependent records deleted");
        Ok(())
    }

    async fn set_import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
        media_id: Uuid,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO import_trackers (batch_id, archive_filename, media_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (batch_id, archive_filename) DO UPDATE SET media_id = EXCLUDED.media_id
            "#,
        )
        .bind(batch_id)
        .bind(archive_filename)
        .bind(media_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
    ) -> StoreResult<Option<Uuid>> {
        let row = sqlx::query(
            "SELECT media_id FROM import_trackers WHERE batch_id = $1 AND archive_filename = $2",
        )
        .bind(batch_id)
        .bind(archive_filename)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row.try_get("media_id").map_err(StoreError::Database))
            .transpose()
    }

    async fn remove_import_tracker(
        &self,
        batch_id: Uuid,
        archive_filename: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "DELETE FROM import_trackers WHERE batch_id = $1 AND archive_filename = $2",
        )
        .bind(batch_id)
        .bind(archive_filename)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_share_token(&self, token: &str, batch_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO share_tokens (token, batch_id)
            VALUES ($1, $2)
            ON CONFLICT (token) DO UPDATE SET batch_id = EXCLUDED.batch_id
            "#,
        )
        .bind(token)
        .bind(batch_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_share_token(&self, token: &str) -> StoreResult<Option<Uuid>> {
        let row = sqlx::query("SELECT batch_id FROM share_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| row.try_get("batch_id").map_err(StoreError::Database))
            .transpose()
    }
}

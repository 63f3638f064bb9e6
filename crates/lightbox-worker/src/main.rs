//! lightbox-workerd: long-running background worker.
//!
//! Loads configuration from the environment, connects to the state store,
//! runs pending migrations and serves the job queue until interrupted.

use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use tracing_subscriber::EnvFilter;

use lightbox_core::Config;
use lightbox_processing::FfmpegTranscoder;
use lightbox_store::PgStateStore;
use lightbox_worker::JobQueue;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        ffmpeg_path = %config.ffmpeg_path,
        upload_root = %config.upload_root.display(),
        video_formats = ?config.video.formats,
        audio_formats = ?config.audio.formats,
        max_workers = config.worker.max_workers,
        "starting lightbox worker"
    );

    ensure!(
        !config.database_url.is_empty(),
        "DATABASE_URL must be set"
    );

    let store = PgStateStore::connect(&config.database_url)
        .await
        .context("connecting to the state store")?;
    store.migrate().await.context("running migrations")?;

    let transcoder = FfmpegTranscoder::new(config.ffmpeg_path.clone())?;
    tokio::fs::create_dir_all(&config.upload_root)
        .await
        .context("creating the upload root")?;

    let queue = JobQueue::start(
        Arc::new(store),
        Arc::new(transcoder),
        Arc::new(config),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    queue.shutdown().await;
    Ok(())
}

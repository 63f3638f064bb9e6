//! In-process job queue and worker pool.
//!
//! Jobs arrive on an unbounded channel; a dispatcher task admits them under
//! a semaphore sized to `worker.max_workers` and runs each on its own task.
//! The retry driver lives here too: a job body that fails with a recoverable
//! error and budget left is re-sent to the channel after an exponential
//! backoff delay, carrying its attempt counter. Cleanup (final status write
//! plus temp-file removal) runs exactly once, after the last attempt.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};

use lightbox_core::Config;
use lightbox_processing::Transcoder;
use lightbox_store::StateStore;

use crate::context::WorkerContext;
use crate::jobs::Job;

/// Job category, used to select the retry budget and backoff seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    VideoConvert,
    AudioConvert,
    ArchiveImport,
}

impl JobKind {
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::VideoConvert => "video_convert",
            JobKind::AudioConvert => "audio_convert",
            JobKind::ArchiveImport => "archive_import",
        }
    }

    fn max_retries(&self, config: &Config) -> u32 {
        match self {
            JobKind::VideoConvert | JobKind::AudioConvert => config.worker.max_retries,
            JobKind::ArchiveImport => config.worker.import_max_retries,
        }
    }

    fn retry_base_delay(&self, config: &Config) -> Duration {
        match self {
            JobKind::VideoConvert => config.video.retry_base_delay,
            JobKind::AudioConvert => config.audio.retry_base_delay,
            JobKind::ArchiveImport => config.worker.import_retry_base_delay,
        }
    }
}

/// A job plus how many retries it has already consumed.
pub(crate) struct QueuedJob {
    pub(crate) job: Job,
    pub(crate) attempt: u32,
}

pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    shutdown_tx: mpsc::Sender<()>,
    context: Arc<WorkerContext>,
}

impl JobQueue {
    /// Spawn the dispatcher and return a handle for submitting jobs.
    pub fn start(
        store: Arc<dyn StateStore>,
        transcoder: Arc<dyn Transcoder>,
        config: Arc<Config>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let context = Arc::new(WorkerContext {
            store,
            transcoder,
            config,
            queue_tx: tx.clone(),
        });

        tokio::spawn(dispatch(rx, shutdown_rx, Arc::clone(&context)));

        Self {
            tx,
            shutdown_tx,
            context,
        }
    }

    pub fn context(&self) -> Arc<WorkerContext> {
        Arc::clone(&self.context)
    }

    pub fn submit(&self, job: Job) {
        if self.tx.send(QueuedJob { job, attempt: 0 }).is_err() {
            tracing::error!("job queue is closed, dropping job");
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    mut shutdown_rx: mpsc::Receiver<()>,
    context: Arc<WorkerContext>,
) {
    let max_workers = context.config.worker.max_workers;
    let semaphore = Arc::new(Semaphore::new(max_workers));
    tracing::info!(max_workers, "worker pool started");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("worker pool shutting down");
                break;
            }
            queued = rx.recv() => {
                let Some(queued) = queued else { break };
                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    let _permit = permit;
                    run_job(context, queued).await;
                });
            }
        }
    }
}

async fn run_job(context: Arc<WorkerContext>, queued: QueuedJob) {
    let QueuedJob { mut job, attempt } = queued;
    let kind = job.kind();

    match job.execute(&context, attempt).await {
        Ok(()) => {
            job.cleanup(&context).await;
        }
        Err(err) => {
            let max_retries = kind.max_retries(&context.config);
            if err.is_recoverable() && attempt < max_retries {
                let delay = backoff_delay(kind.retry_base_delay(&context.config), attempt);
                tracing::warn!(
                    job = kind.label(),
                    attempt,
                    max_retries,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "attempt failed, scheduling retry"
                );
                let tx = context.queue_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let retry = QueuedJob {
                        job,
                        attempt: attempt + 1,
                    };
                    if tx.send(retry).is_err() {
                        tracing::error!("job queue is closed, dropping retry");
                    }
                });
            } else {
                tracing::error!(
                    job = kind.label(),
                    attempt,
                    error = %err,
                    "job failed permanently"
                );
                job.cleanup(&context).await;
            }
        }
    }
}

/// Delay before retry number `attempt + 1`: base doubled per consumed attempt.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt)
}

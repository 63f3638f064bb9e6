//! Shared handles every job runs against.

use std::sync::Arc;

use tokio::sync::mpsc;

use lightbox_core::Config;
use lightbox_processing::{AudioProfile, Transcoder, VideoProfile};
use lightbox_store::StateStore;

use crate::jobs::Job;
use crate::queue::QueuedJob;

/// Dependencies handed to each running job: the state store, the transcoder
/// seam, configuration, and a sender back into the queue so a job can fan
/// out follow-up jobs (archive import enqueuing conversions).
pub struct WorkerContext {
    pub store: Arc<dyn StateStore>,
    pub transcoder: Arc<dyn Transcoder>,
    pub config: Arc<Config>,
    pub(crate) queue_tx: mpsc::UnboundedSender<QueuedJob>,
}

impl WorkerContext {
    pub fn video_profile(&self) -> VideoProfile {
        VideoProfile {
            codec: self.config.video.codec.clone(),
            preset: self.config.video.preset.clone(),
            crf: self.config.video.crf.clone(),
            audio_codec: self.config.video.audio_codec.clone(),
            audio_bitrate: self.config.video.audio_bitrate.clone(),
        }
    }

    pub fn audio_profile(&self) -> AudioProfile {
        AudioProfile {
            encoder: self.config.audio.encoder.clone(),
            options: self.config.audio.options.clone(),
            sample_rate: self.config.audio.sample_rate.clone(),
        }
    }

    /// Enqueue a fresh job (attempt 0). Dropped with an error log if the
    /// queue has already shut down.
    pub fn enqueue(&self, job: Job) {
        if self.queue_tx.send(QueuedJob { job, attempt: 0 }).is_err() {
            tracing::error!("job queue is closed, dropping job");
        }
    }
}

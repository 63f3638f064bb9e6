//! LightBox background worker.
//!
//! Hosts the in-process job queue, the bounded worker pool with its
//! exponential-backoff retry driver, and the two job bodies: media
//! conversion (video to MP4, audio to MP3) and archive import.

mod context;
pub mod jobs;
mod queue;

pub use context::WorkerContext;
pub use jobs::{ArchiveImportJob, ConversionJob, Job};
pub use queue::{JobKind, JobQueue};

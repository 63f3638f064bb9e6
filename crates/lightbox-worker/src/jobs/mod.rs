//! Job bodies executed by the worker pool.
//!
//! A job is `execute`d up to `1 + max_retries` times; `cleanup` runs exactly
//! once after the final attempt, whatever its outcome, and carries the two
//! trailing side effects: the guarded terminal status write and removal of
//! the job's temporary input.

mod convert;
mod import;

pub use convert::ConversionJob;
pub use import::ArchiveImportJob;

use lightbox_core::JobError;

use crate::context::WorkerContext;
use crate::queue::JobKind;

pub enum Job {
    Convert(ConversionJob),
    Import(ArchiveImportJob),
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::Convert(job) => job.kind(),
            Job::Import(_) => JobKind::ArchiveImport,
        }
    }

    pub(crate) async fn execute(
        &mut self,
        context: &WorkerContext,
        attempt: u32,
    ) -> Result<(), JobError> {
        match self {
            Job::Convert(job) => job.execute(context, attempt).await,
            Job::Import(job) => job.execute(context, attempt).await,
        }
    }

    pub(crate) async fn cleanup(&mut self, context: &WorkerContext) {
        match self {
            Job::Convert(job) => job.cleanup(context).await,
            Job::Import(job) => job.cleanup(context).await,
        }
    }
}

//! Failure type returned by job bodies.
//!
//! Whether a failed attempt is worth retrying is decided at the point the
//! failure happens, not guessed later from the error text. The queue's
//! retry driver only reads the flag; it never downcasts the inner error.

/// A failed job attempt, flagged as retryable or not.
#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl JobError {
    /// Retrying cannot help (corrupt input, missing owner, a bug).
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// Retrying might help (non-zero exit, timeout, store hiccup).
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_flag_is_preserved() {
        let transient = JobError::recoverable(anyhow::anyhow!("ffmpeg exited with 1"));
        assert!(transient.is_recoverable());

        let permanent = JobError::unrecoverable(anyhow::anyhow!("corrupted archive"));
        assert!(!permanent.is_recoverable());
    }

    #[test]
    fn display_forwards_to_inner_error() {
        let err = JobError::recoverable(anyhow::anyhow!("timeout after 3600s"));
        assert_eq!(err.to_string(), "timeout after 3600s");
    }
}

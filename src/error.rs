//! Structured error taxonomy (spec §7).
//!
//! Call sites use `anyhow::Result` with `.context(...)` the way the
//! teacher's command modules do; these variants are the handful of
//! cases callers need to distinguish (job-not-found, invalid-job,
//! submit failure, callback failure, lock contention).

use std::path::PathBuf;

use thiserror::Error;

/// Core error taxonomy. Filesystem/locking errors that don't need
/// special handling propagate as `std::io::Error` via `#[from]`.
#[derive(Debug, Error)]
pub enum PsikError {
    #[error("job not found: {0}")]
    JobNotFound(PathBuf),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("submit failed: backend returned no native id")]
    SubmitError,

    #[error("callback delivery failed: {0}")]
    CallbackError(String),

    #[error("status log is locked by another writer")]
    Contention,

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PsikError>;

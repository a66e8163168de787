//! Error taxonomy for client operations.
//!
//! Batch-level problems (bad configuration, unreachable service) are
//! returned straight to the caller. Job-level problems (history failures,
//! remote execution errors, timeouts) are collected per job id by
//! [`Poller::wait_all`](crate::poller::Poller::wait_all).

use std::time::Duration;

use comfybatch_core::error::CoreError;
use comfybatch_core::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum ComfyError {
    /// Bad seed plan, missing workflow, or unusable settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A template path did not resolve.
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: Vec<String>, reason: String },

    /// The queue service could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The queue service rejected a submission.
    #[error("Queue error: {0}")]
    Queue(String),

    /// History for a job could not be fetched.
    #[error("History error for job {job_id}: {message}")]
    History { job_id: JobId, message: String },

    /// The job failed on the server.
    #[error("Execution error for job {job_id}: {message}")]
    Execution {
        job_id: JobId,
        node_id: Option<String>,
        message: String,
    },

    /// No output appeared within the polling budget.
    #[error("Job {job_id} did not finish within {waited:?}")]
    Timeout {
        job_id: JobId,
        waited: Duration,
        /// Most recent history failure, when the last polls were failing.
        last_error: Option<String>,
    },

    /// The job's history carries no artifact.
    #[error("No output found for job {job_id}")]
    NoOutput { job_id: JobId },

    #[error("Download error: {0}")]
    Download(String),

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// The caller cancelled the wait before the job resolved.
    #[error("Waiting for job {job_id} was cancelled")]
    Cancelled { job_id: JobId },

    /// The polling task for a job panicked or was aborted.
    #[error("Polling task for job {job_id} failed: {message}")]
    TaskFailed { job_id: JobId, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for ComfyError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Configuration(msg) => Self::Configuration(msg),
            CoreError::InvalidPath { path, reason } => Self::InvalidPath { path, reason },
            CoreError::UnsupportedInput(msg) => Self::UnsupportedInput(msg),
            CoreError::MissingDependency(msg) => Self::MissingDependency(msg),
            CoreError::Io(e) => Self::Io(e),
        }
    }
}

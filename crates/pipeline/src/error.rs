//! Error types for the orchestration layer.

use docshift_core::batch::BatchError;
use docshift_core::ports::{BlobError, QueueError, StoreError};
use docshift_core::types::JobId;

/// Errors returned by [`crate::JobOrchestrator`] operations.
///
/// Each variant maps to a stable machine-readable code via
/// [`OrchestratorError::code`].
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("batch contains no files")]
    EmptyBatch,

    #[error("too many files: {count} submitted, maximum is {max}")]
    TooManyFiles { count: usize, max: usize },

    #[error("file too large: {filename} is {size} bytes, maximum is {max}")]
    FileTooLarge { filename: String, size: u64, max: u64 },

    #[error("invalid filename '{filename}': {reason}")]
    InvalidFilename { filename: String, reason: &'static str },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {0} is not ready")]
    NotReady(JobId),

    #[error("job {0} has no archive: every file failed")]
    NoArchive(JobId),

    #[error("archive for job {job_id} could not be assembled: {reason}")]
    ArchiveFailed { job_id: JobId, reason: String },

    #[error("file '{filename}' not found in job {job_id}")]
    FileNotFound { job_id: JobId, filename: String },

    #[error("file '{filename}' in job {job_id} is not converted yet")]
    FileNotReady { job_id: JobId, filename: String },

    #[error("file '{filename}' in job {job_id} failed: {error}")]
    FileFailed {
        job_id: JobId,
        filename: String,
        error: String,
    },

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("storage error: {0}")]
    Storage(#[from] BlobError),
}

impl OrchestratorError {
    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::EmptyBatch => "EMPTY_BATCH",
            OrchestratorError::TooManyFiles { .. } => "TOO_MANY_FILES",
            OrchestratorError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            OrchestratorError::InvalidFilename { .. } => "INVALID_FILENAME",
            OrchestratorError::JobNotFound(_) => "JOB_NOT_FOUND",
            OrchestratorError::NotReady(_) => "NOT_READY",
            OrchestratorError::NoArchive(_) => "NO_ARCHIVE",
            OrchestratorError::ArchiveFailed { .. } => "ARCHIVE_FAILED",
            OrchestratorError::FileNotFound { .. } => "FILE_NOT_FOUND",
            OrchestratorError::FileNotReady { .. } => "FILE_NOT_READY",
            OrchestratorError::FileFailed { .. } => "FILE_FAILED",
            OrchestratorError::Store(_) | OrchestratorError::Storage(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller is at fault (as opposed to the service).
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            OrchestratorError::Store(_) | OrchestratorError::Storage(_)
        )
    }
}

impl From<BatchError> for OrchestratorError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::EmptyBatch => OrchestratorError::EmptyBatch,
            BatchError::TooManyFiles { count, max } => OrchestratorError::TooManyFiles { count, max },
            BatchError::FileTooLarge {
                filename,
                size,
                max,
            } => OrchestratorError::FileTooLarge {
                filename,
                size,
                max,
            },
            BatchError::InvalidFilename { filename, reason } => {
                OrchestratorError::InvalidFilename { filename, reason }
            }
        }
    }
}

/// Failures of a worker or sweep cycle. The delivery being processed is
/// left unacknowledged so the queue hands it out again.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Failures of archive assembly.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {job_id} still has {unsettled} unsettled task(s)")]
    NotSettled { job_id: JobId, unsettled: usize },

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("storage error: {0}")]
    Storage(#[from] BlobError),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

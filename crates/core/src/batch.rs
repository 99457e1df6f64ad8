//! Batch admission rules.
//!
//! A batch is validated as a whole before any record is created: one bad
//! file rejects the entire submission.

use serde::{Deserialize, Serialize};

use crate::types::BlobKey;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default maximum number of files per job.
pub const DEFAULT_MAX_FILES_PER_JOB: usize = 1000;

/// Default maximum size of a single file (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum length of a submitted filename.
const MAX_FILENAME_LEN: usize = 255;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One file of a submission, already uploaded to blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedFile {
    /// Original filename as given by the caller.
    pub filename: String,
    /// Where the uploaded bytes live.
    pub content_ref: BlobKey,
    pub size_bytes: u64,
}

/// Configured admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_files: usize,
    pub max_file_size: u64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES_PER_JOB,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Why a batch was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("batch contains no files")]
    EmptyBatch,

    #[error("too many files: {count} submitted, maximum is {max}")]
    TooManyFiles { count: usize, max: usize },

    #[error("file too large: {filename} is {size} bytes, maximum is {max}")]
    FileTooLarge { filename: String, size: u64, max: u64 },

    #[error("invalid filename '{filename}': {reason}")]
    InvalidFilename { filename: String, reason: &'static str },
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a whole batch against `limits`.
///
/// Checks run in order: emptiness, file count, then each file's name and
/// size in submission order. The first violation wins.
pub fn validate_batch(files: &[SubmittedFile], limits: &BatchLimits) -> Result<(), BatchError> {
    if files.is_empty() {
        return Err(BatchError::EmptyBatch);
    }
    if files.len() > limits.max_files {
        return Err(BatchError::TooManyFiles {
            count: files.len(),
            max: limits.max_files,
        });
    }
    for file in files {
        validate_filename(&file.filename)?;
        if file.size_bytes > limits.max_file_size {
            return Err(BatchError::FileTooLarge {
                filename: file.filename.clone(),
                size: file.size_bytes,
                max: limits.max_file_size,
            });
        }
    }
    Ok(())
}

fn validate_filename(filename: &str) -> Result<(), BatchError> {
    let invalid = |reason| BatchError::InvalidFilename {
        filename: filename.to_string(),
        reason,
    };
    if filename.trim().is_empty() {
        return Err(invalid("must not be blank"));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(invalid("exceeds 255 bytes"));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains('\0') {
        return Err(invalid("must not contain path separators"));
    }
    if filename == "." || filename == ".." {
        return Err(invalid("must not be a relative path"));
    }
    Ok(())
}

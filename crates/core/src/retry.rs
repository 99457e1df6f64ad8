//! Failure classification and the bounded retry policy.
//!
//! Every failure coming back from the conversion engine carries an
//! [`ErrorClass`]. Transient failures are requeued while the attempt budget
//! lasts; permanent ones are recorded immediately. Anything the engine could
//! not classify is treated as permanent so a task can never loop forever.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default total attempts per task: the first run plus one retry.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 2;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Retry eligibility of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }

    /// Parse from a string, defaulting to `Permanent` for unknown values.
    pub fn parse(s: &str) -> Self {
        match s {
            "transient" => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }
}

/// What went wrong during a conversion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionErrorKind {
    /// The engine exceeded the wall-clock timeout.
    Timeout,
    /// The engine could not be reached or started.
    EngineUnavailable,
    /// The worker holding the task disappeared mid-conversion.
    WorkerLost,
    /// The input could not be read as a document.
    MalformedInput,
    /// The input is a format the engine does not handle.
    UnsupportedContent,
    /// The engine failed without saying why.
    Unclassified,
}

impl ConversionErrorKind {
    /// The class each kind falls into.
    pub fn class(self) -> ErrorClass {
        match self {
            ConversionErrorKind::Timeout
            | ConversionErrorKind::EngineUnavailable
            | ConversionErrorKind::WorkerLost => ErrorClass::Transient,
            ConversionErrorKind::MalformedInput
            | ConversionErrorKind::UnsupportedContent
            | ConversionErrorKind::Unclassified => ErrorClass::Permanent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConversionErrorKind::Timeout => "timeout",
            ConversionErrorKind::EngineUnavailable => "engine_unavailable",
            ConversionErrorKind::WorkerLost => "worker_lost",
            ConversionErrorKind::MalformedInput => "malformed_input",
            ConversionErrorKind::UnsupportedContent => "unsupported_content",
            ConversionErrorKind::Unclassified => "unclassified",
        }
    }

    /// Parse from a string, defaulting to `Unclassified` for unknown values.
    pub fn parse(s: &str) -> Self {
        match s {
            "timeout" => ConversionErrorKind::Timeout,
            "engine_unavailable" => ConversionErrorKind::EngineUnavailable,
            "worker_lost" => ConversionErrorKind::WorkerLost,
            "malformed_input" => ConversionErrorKind::MalformedInput,
            "unsupported_content" => ConversionErrorKind::UnsupportedContent,
            _ => ConversionErrorKind::Unclassified,
        }
    }
}

/// A failure reported by the conversion engine, always classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} {}: {message}", .kind.class().as_str(), .kind.as_str())]
pub struct ConversionError {
    pub kind: ConversionErrorKind,
    pub message: String,
}

impl ConversionError {
    pub fn new(kind: ConversionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ConversionErrorKind::Timeout, message)
    }

    pub fn engine_unavailable(message: impl Into<String>) -> Self {
        Self::new(ConversionErrorKind::EngineUnavailable, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ConversionErrorKind::MalformedInput, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ConversionErrorKind::UnsupportedContent, message)
    }

    /// Wrap an error the engine did not classify. Always permanent.
    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(ConversionErrorKind::Unclassified, message)
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}

// ---------------------------------------------------------------------------
// Persisted descriptor
// ---------------------------------------------------------------------------

/// Human-readable error descriptor stored on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub class: ErrorClass,
    pub kind: ConversionErrorKind,
    pub message: String,
}

impl TaskError {
    /// Record a failure that will not be retried.
    ///
    /// A transient failure reaching this point has exhausted its budget, so
    /// it is demoted to permanent and the attempt count is noted.
    pub fn final_failure(error: &ConversionError, attempts: i32) -> Self {
        match error.class() {
            ErrorClass::Permanent => Self {
                class: ErrorClass::Permanent,
                kind: error.kind,
                message: error.message.clone(),
            },
            ErrorClass::Transient => Self {
                class: ErrorClass::Permanent,
                kind: error.kind,
                message: format!(
                    "{} (gave up after {attempts} attempt{})",
                    error.message,
                    if attempts == 1 { "" } else { "s" }
                ),
            },
        }
    }

    /// Rebuild a descriptor from its stored columns.
    pub fn from_parts(class: &str, kind: &str, message: String) -> Self {
        Self {
            class: ErrorClass::parse(class),
            kind: ConversionErrorKind::parse(kind),
            message,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{} {}: {}",
            self.class.as_str(),
            self.kind.as_str(),
            self.message
        )
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What to do with a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the task to `PENDING` and publish the next attempt.
    Requeue { next_attempt: i32 },
    /// Record the failure; no further attempts.
    Fail,
}

/// Bounded immediate-requeue policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: i32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Decide the fate of `attempt` (1-based) that failed with `class`.
    pub fn decide(&self, attempt: i32, class: ErrorClass) -> RetryDecision {
        match class {
            ErrorClass::Transient if attempt < self.max_attempts => RetryDecision::Requeue {
                next_attempt: attempt + 1,
            },
            ErrorClass::Transient | ErrorClass::Permanent => RetryDecision::Fail,
        }
    }
}

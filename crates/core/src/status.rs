//! Job and task status enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table. Transition tables are
//! exhaustive `match`es so adding a variant forces every rule to be revisited.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Resolve a database status ID.
            pub fn from_id(id: StatusId) -> Result<Self, CoreError> {
                match id {
                    $( $val => Ok($name::$variant), )+
                    other => Err(CoreError::UnknownStatus {
                        kind: stringify!($name),
                        id: other,
                    }),
                }
            }

            /// Upper-case label used in reports and logs.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_status_enum! {
    /// Aggregate status of a submitted batch. Always derived from its tasks.
    JobStatus {
        Pending = 1 => "PENDING",
        InProgress = 2 => "IN_PROGRESS",
        Completed = 3 => "COMPLETED",
        Failed = 4 => "FAILED",
    }
}

define_status_enum! {
    /// Status of a single file conversion.
    TaskStatus {
        Pending = 1 => "PENDING",
        Running = 2 => "RUNNING",
        Succeeded = 3 => "SUCCEEDED",
        Failed = 4 => "FAILED",
    }
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position in the forward-only lifecycle.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::InProgress => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Whether the job may move from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::InProgress) => true,
            (JobStatus::Pending | JobStatus::InProgress, JobStatus::Completed) => true,
            (JobStatus::Pending | JobStatus::InProgress, JobStatus::Failed) => true,
            (JobStatus::Pending, JobStatus::Pending)
            | (JobStatus::InProgress, JobStatus::InProgress | JobStatus::Pending)
            | (JobStatus::Completed, _)
            | (JobStatus::Failed, _) => false,
        }
    }

    /// Apply a freshly reduced status without ever moving backwards.
    ///
    /// Terminal statuses are sticky and `IN_PROGRESS` never returns to
    /// `PENDING`, even if every task is momentarily pending again after a
    /// retry.
    pub fn advance(self, computed: JobStatus) -> JobStatus {
        if self.is_terminal() || computed.rank() <= self.rank() {
            self
        } else {
            computed
        }
    }
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// Whether the task may move from `self` to `next`.
    ///
    /// `Running -> Pending` is the bounded retry path; every other edge
    /// moves forward.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Running, TaskStatus::Succeeded) => true,
            (TaskStatus::Running, TaskStatus::Failed) => true,
            (TaskStatus::Running, TaskStatus::Pending) => true,
            (TaskStatus::Pending, TaskStatus::Pending | TaskStatus::Succeeded | TaskStatus::Failed)
            | (TaskStatus::Running, TaskStatus::Running)
            | (TaskStatus::Succeeded, _)
            | (TaskStatus::Failed, _) => false,
        }
    }
}

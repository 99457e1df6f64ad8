//! Job status reduction.
//!
//! A job's status is a pure function of its tasks. The rule is
//! deliberately asymmetric: one successful task is enough for the job to
//! complete (a usable archive exists), and the job fails only when every
//! task failed.

use serde::Serialize;

use crate::model::Task;
use crate::status::{JobStatus, TaskStatus};

/// Per-status task tally for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    /// Pending tasks that have never been attempted.
    pub queued: usize,
    /// Pending tasks waiting for a retry attempt.
    pub retrying: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl TaskCounts {
    /// Tally `(status, attempts)` pairs.
    pub fn tally<I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = (TaskStatus, i32)>,
    {
        let mut counts = TaskCounts::default();
        for (status, attempts) in tasks {
            counts.add(status, attempts);
        }
        counts
    }

    pub fn from_tasks<'a, I>(tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        Self::tally(tasks.into_iter().map(|t| (t.status, t.attempts)))
    }

    pub fn add(&mut self, status: TaskStatus, attempts: i32) {
        match status {
            TaskStatus::Pending if attempts > 0 => self.retrying += 1,
            TaskStatus::Pending => self.queued += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.retrying + self.running + self.succeeded + self.failed
    }

    pub fn settled(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn all_settled(&self) -> bool {
        self.total() > 0 && self.settled() == self.total()
    }

    /// Reduce the tally to a job status.
    ///
    /// - every task terminal: `COMPLETED` if any succeeded, else `FAILED`;
    /// - any task has left its initial `PENDING`: `IN_PROGRESS`;
    /// - otherwise `PENDING`.
    pub fn reduce(&self) -> JobStatus {
        if self.all_settled() {
            if self.succeeded > 0 {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            }
        } else if self.queued == self.total() {
            JobStatus::Pending
        } else {
            JobStatus::InProgress
        }
    }
}

/// Outcome of one atomic job recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobTransition {
    pub previous: JobStatus,
    pub current: JobStatus,
    pub counts: TaskCounts,
}

impl JobTransition {
    /// Compute the transition from `previous` given a fresh tally.
    pub fn compute(previous: JobStatus, counts: TaskCounts) -> Self {
        Self {
            previous,
            current: previous.advance(counts.reduce()),
            counts,
        }
    }

    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// True for exactly the recomputation that made the job terminal.
    pub fn became_terminal(&self) -> bool {
        !self.previous.is_terminal() && self.current.is_terminal()
    }
}

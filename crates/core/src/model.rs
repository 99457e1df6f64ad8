//! Job and task entities, the queued invocation message, and conditional
//! task transitions.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::batch::SubmittedFile;
use crate::retry::TaskError;
use crate::status::{JobStatus, TaskStatus};
use crate::types::{BlobKey, JobId, TaskId, Timestamp};

/// A submitted batch. Its status is only ever written by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    /// Owned tasks in submission order.
    pub task_ids: Vec<TaskId>,
    pub archive_location: Option<BlobKey>,
    pub archive_error: Option<String>,
}

/// Unit of conversion work for one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    /// Zero-based index in the submitted batch.
    pub position: i32,
    pub filename: String,
    pub content_ref: BlobKey,
    pub size_bytes: u64,
    pub status: TaskStatus,
    /// Number of attempts started so far.
    pub attempts: i32,
    pub output_location: Option<BlobKey>,
    pub error: Option<TaskError>,
    pub enqueued_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Job {
    /// Build a pending job and one pending task per file, in order.
    pub fn from_batch(files: &[SubmittedFile]) -> (Job, Vec<Task>) {
        let now = Utc::now();
        let job_id = JobId::new();

        let tasks: Vec<Task> = files
            .iter()
            .enumerate()
            .map(|(position, file)| Task {
                id: TaskId::new(),
                job_id,
                position: position as i32,
                filename: file.filename.clone(),
                content_ref: file.content_ref.clone(),
                size_bytes: file.size_bytes,
                status: TaskStatus::Pending,
                attempts: 0,
                output_location: None,
                error: None,
                enqueued_at: now,
                started_at: None,
                finished_at: None,
            })
            .collect();

        let job = Job {
            id: job_id,
            status: JobStatus::Pending,
            created_at: now,
            completed_at: None,
            task_ids: tasks.iter().map(|t| t.id).collect(),
            archive_location: None,
            archive_error: None,
        };

        (job, tasks)
    }
}

/// Message carried by the work queue: one conversion attempt of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInvocation {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub content_ref: BlobKey,
    /// 1-based attempt this invocation is meant to run.
    pub attempt: i32,
}

impl TaskInvocation {
    /// The invocation that runs the task's next attempt.
    pub fn next_for(task: &Task) -> Self {
        Self {
            job_id: task.job_id,
            task_id: task.id,
            content_ref: task.content_ref.clone(),
            attempt: task.attempts + 1,
        }
    }
}

/// A conditional task status change.
///
/// The store applies it only if the task is still in `from` with the
/// attempt count returned by [`TaskTransition::expected_attempts`], which
/// is how duplicate and stale deliveries are detected.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransition {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub attempt: i32,
    pub output_location: Option<BlobKey>,
    pub error: Option<TaskError>,
}

impl TaskTransition {
    fn new(job_id: JobId, task_id: TaskId, from: TaskStatus, to: TaskStatus, attempt: i32) -> Self {
        debug_assert!(from.can_transition_to(to), "illegal task transition {from} -> {to}");
        Self {
            job_id,
            task_id,
            from,
            to,
            attempt,
            output_location: None,
            error: None,
        }
    }

    /// `PENDING -> RUNNING` for `attempt`.
    pub fn start(job_id: JobId, task_id: TaskId, attempt: i32) -> Self {
        Self::new(job_id, task_id, TaskStatus::Pending, TaskStatus::Running, attempt)
    }

    /// `RUNNING -> SUCCEEDED` with the produced output.
    pub fn succeed(job_id: JobId, task_id: TaskId, attempt: i32, output: BlobKey) -> Self {
        let mut t = Self::new(job_id, task_id, TaskStatus::Running, TaskStatus::Succeeded, attempt);
        t.output_location = Some(output);
        t
    }

    /// `RUNNING -> FAILED` with the error descriptor.
    pub fn fail(job_id: JobId, task_id: TaskId, attempt: i32, error: TaskError) -> Self {
        let mut t = Self::new(job_id, task_id, TaskStatus::Running, TaskStatus::Failed, attempt);
        t.error = Some(error);
        t
    }

    /// `RUNNING -> PENDING` ahead of the next attempt.
    pub fn requeue(job_id: JobId, task_id: TaskId, attempt: i32) -> Self {
        Self::new(job_id, task_id, TaskStatus::Running, TaskStatus::Pending, attempt)
    }

    /// Attempt count the task must currently have for this change to apply.
    pub fn expected_attempts(&self) -> i32 {
        match (self.from, self.to) {
            (TaskStatus::Pending, TaskStatus::Running) => self.attempt - 1,
            _ => self.attempt,
        }
    }

    /// Whether the stored task matches this transition's precondition.
    pub fn applies_to(&self, task: &Task) -> bool {
        task.job_id == self.job_id
            && task.id == self.task_id
            && task.status == self.from
            && task.attempts == self.expected_attempts()
    }

    /// Apply the change in place, stamping timestamps with `now`.
    ///
    /// Callers check [`TaskTransition::applies_to`] first.
    pub fn apply(&self, task: &mut Task, now: Timestamp) {
        task.status = self.to;
        task.attempts = self.attempt;
        match self.to {
            TaskStatus::Running => {
                task.started_at = Some(now);
                task.finished_at = None;
            }
            TaskStatus::Pending => {
                task.enqueued_at = now;
                task.started_at = None;
            }
            TaskStatus::Succeeded | TaskStatus::Failed => {
                task.finished_at = Some(now);
            }
        }
        task.output_location = self.output_location.clone();
        task.error = self.error.clone();
    }
}

/// Result of archive assembly as persisted on the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveRecord {
    Ready(BlobKey),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::{ConversionError, TaskError};

    fn batch(names: &[&str]) -> Vec<SubmittedFile> {
        names
            .iter()
            .map(|n| SubmittedFile {
                filename: n.to_string(),
                content_ref: BlobKey::parse(format!("uploads/{n}")).unwrap(),
                size_bytes: 10,
            })
            .collect()
    }

    #[test]
    fn from_batch_preserves_submission_order() {
        let (job, tasks) = Job::from_batch(&batch(&["a.docx", "b.docx", "c.docx"]));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(tasks.len(), 3);
        assert_eq!(job.task_ids, tasks.iter().map(|t| t.id).collect::<Vec<_>>());
        assert_eq!(tasks[1].filename, "b.docx");
        assert_eq!(tasks[2].position, 2);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending && t.attempts == 0));
        assert!(tasks.iter().all(|t| t.job_id == job.id));
    }

    #[test]
    fn start_guard_matches_next_attempt_only() {
        let (_, mut tasks) = Job::from_batch(&batch(&["a.docx"]));
        let task = &mut tasks[0];

        let first = TaskTransition::start(task.job_id, task.id, 1);
        assert!(first.applies_to(task));
        first.apply(task, Utc::now());
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.attempts, 1);

        // A redelivery of the same invocation no longer applies.
        assert!(!first.applies_to(task));
    }

    #[test]
    fn stale_invocation_after_requeue_is_rejected() {
        let (_, mut tasks) = Job::from_batch(&batch(&["a.docx"]));
        let task = &mut tasks[0];
        let (job_id, task_id) = (task.job_id, task.id);

        TaskTransition::start(job_id, task_id, 1).apply(task, Utc::now());
        let requeue = TaskTransition::requeue(job_id, task_id, 1);
        assert!(requeue.applies_to(task));
        requeue.apply(task, Utc::now());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);

        assert!(!TaskTransition::start(job_id, task_id, 1).applies_to(task));
        assert!(TaskTransition::start(job_id, task_id, 2).applies_to(task));
        assert_eq!(TaskInvocation::next_for(task).attempt, 2);
    }

    #[test]
    fn terminal_transitions_record_outcome() {
        let (_, mut tasks) = Job::from_batch(&batch(&["a.docx", "b.docx"]));
        let now = Utc::now();

        let a = &mut tasks[0];
        TaskTransition::start(a.job_id, a.id, 1).apply(a, now);
        let output = BlobKey::parse("outputs/a.pdf").unwrap();
        TaskTransition::succeed(a.job_id, a.id, 1, output.clone()).apply(a, now);
        assert_eq!(a.status, TaskStatus::Succeeded);
        assert_eq!(a.output_location, Some(output));
        assert!(a.finished_at.is_some());

        let b = &mut tasks[1];
        TaskTransition::start(b.job_id, b.id, 1).apply(b, now);
        let err = TaskError::final_failure(&ConversionError::malformed("bad"), 1);
        TaskTransition::fail(b.job_id, b.id, 1, err.clone()).apply(b, now);
        assert_eq!(b.status, TaskStatus::Failed);
        assert_eq!(b.error, Some(err));
    }
}

use crate::aggregate::JobTransition;
use crate::model::{ArchiveRecord, Job, Task, TaskTransition};
use crate::types::{JobId, TaskId, Timestamp};

/// Durable Job/Task records.
///
/// `transition_task` and `recompute_job` are the only ways statuses change.
/// Both are atomic per job: concurrent calls for the same job serialize,
/// calls for different jobs do not contend.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a job and all its tasks in one atomic write.
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> Result<(), StoreError>;

    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Tasks of a job in submission order.
    async fn list_tasks(&self, job_id: JobId) -> Result<Vec<Task>, StoreError>;

    async fn find_task(&self, job_id: JobId, task_id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Apply `transition` if its precondition still holds.
    ///
    /// Returns `false` when the task has moved on (duplicate or stale
    /// delivery, lost race); nothing is written in that case.
    async fn transition_task(&self, transition: &TaskTransition) -> Result<bool, StoreError>;

    /// Refresh the enqueue timestamp of a task that is still `PENDING`
    /// with `attempts` attempts. Returns whether it matched.
    async fn mark_enqueued(&self, job_id: JobId, task_id: TaskId, attempts: i32) -> Result<bool, StoreError>;

    /// Recount the job's tasks and advance its status, atomically.
    async fn recompute_job(&self, job_id: JobId) -> Result<JobTransition, StoreError>;

    /// Record the archive outcome. Only the first record is kept; returns
    /// whether this call wrote it.
    async fn record_archive(&self, job_id: JobId, record: &ArchiveRecord) -> Result<bool, StoreError>;

    /// `PENDING` tasks enqueued before `before`, oldest first.
    async fn stale_pending_tasks(&self, before: Timestamp, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// `RUNNING` tasks started before `before`, oldest first.
    async fn stalled_running_tasks(&self, before: Timestamp, limit: usize) -> Result<Vec<Task>, StoreError>;

    /// `COMPLETED` jobs finished before `before` with neither an archive
    /// nor an archive error.
    async fn unarchived_jobs(&self, before: Timestamp, limit: usize) -> Result<Vec<JobId>, StoreError>;

    /// Non-terminal jobs whose tasks are all terminal, the last one having
    /// finished before `before`. Left behind when a recomputation failed
    /// after the final task settled.
    async fn unsettled_jobs(&self, before: Timestamp, limit: usize) -> Result<Vec<JobId>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

//! [`RecordStore`] backed by PostgreSQL.

use async_trait::async_trait;
use docshift_core::aggregate::{JobTransition, TaskCounts};
use docshift_core::error::CoreError;
use docshift_core::model::{ArchiveRecord, Job, Task, TaskTransition};
use docshift_core::ports::{RecordStore, StoreError};
use docshift_core::status::{JobStatus, TaskStatus};
use docshift_core::types::{JobId, TaskId, Timestamp};
use sqlx::PgPool;
use tracing::instrument;

use crate::models::task::TaskRow;
use crate::repositories::{JobRepo, TaskRepo};

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_failed(e: sqlx::Error) -> StoreError {
    StoreError::QueryFailed(e.to_string())
}

fn corrupt(e: CoreError) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn to_tasks(rows: Vec<TaskRow>) -> Result<Vec<Task>, StoreError> {
    rows.into_iter()
        .map(|r| Task::try_from(r).map_err(corrupt))
        .collect()
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self, job, tasks), fields(job_id = %job.id, tasks = tasks.len()))]
    async fn create_job(&self, job: &Job, tasks: &[Task]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;
        JobRepo::insert(&mut tx, job.id.as_uuid(), job.status, job.created_at)
            .await
            .map_err(query_failed)?;
        TaskRepo::insert_all(&mut tx, tasks)
            .await
            .map_err(query_failed)?;
        tx.commit().await.map_err(query_failed)?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn find_job(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        let Some(row) = JobRepo::find_by_id(&self.pool, job_id.as_uuid())
            .await
            .map_err(query_failed)?
        else {
            return Ok(None);
        };
        let task_ids = TaskRepo::list_ids(&self.pool, job_id.as_uuid())
            .await
            .map_err(query_failed)?
            .into_iter()
            .map(TaskId::from_uuid)
            .collect();
        row.into_job(task_ids).map(Some).map_err(corrupt)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn list_tasks(&self, job_id: JobId) -> Result<Vec<Task>, StoreError> {
        let rows = TaskRepo::list_by_job(&self.pool, job_id.as_uuid())
            .await
            .map_err(query_failed)?;
        to_tasks(rows)
    }

    #[instrument(skip(self), fields(job_id = %job_id, task_id = %task_id))]
    async fn find_task(&self, job_id: JobId, task_id: TaskId) -> Result<Option<Task>, StoreError> {
        TaskRepo::find(&self.pool, job_id.as_uuid(), task_id.as_uuid())
            .await
            .map_err(query_failed)?
            .map(|r| Task::try_from(r).map_err(corrupt))
            .transpose()
    }

    #[instrument(
        skip(self, transition),
        fields(
            job_id = %transition.job_id,
            task_id = %transition.task_id,
            from = %transition.from,
            to = %transition.to,
            attempt = transition.attempt,
        )
    )]
    async fn transition_task(&self, transition: &TaskTransition) -> Result<bool, StoreError> {
        TaskRepo::transition(&self.pool, transition)
            .await
            .map_err(query_failed)
    }

    #[instrument(skip(self), fields(job_id = %job_id, task_id = %task_id))]
    async fn mark_enqueued(&self, job_id: JobId, task_id: TaskId, attempts: i32) -> Result<bool, StoreError> {
        TaskRepo::touch_enqueued(&self.pool, job_id.as_uuid(), task_id.as_uuid(), attempts)
            .await
            .map_err(query_failed)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn recompute_job(&self, job_id: JobId) -> Result<JobTransition, StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        let status_id = JobRepo::lock_status(&mut tx, job_id.as_uuid())
            .await
            .map_err(query_failed)?
            .ok_or(StoreError::JobNotFound(job_id))?;
        let previous = JobStatus::from_id(status_id).map_err(corrupt)?;

        let mut counts = TaskCounts::default();
        for row in TaskRepo::status_rows(&mut tx, job_id.as_uuid())
            .await
            .map_err(query_failed)?
        {
            counts.add(TaskStatus::from_id(row.status_id).map_err(corrupt)?, row.attempts);
        }

        let transition = JobTransition::compute(previous, counts);
        if transition.changed() {
            JobRepo::update_status(&mut tx, job_id.as_uuid(), transition.current)
                .await
                .map_err(query_failed)?;
        }
        tx.commit().await.map_err(query_failed)?;

        if transition.changed() {
            tracing::debug!(
                job_id = %job_id,
                from = %transition.previous,
                to = %transition.current,
                "Job status advanced",
            );
        }
        Ok(transition)
    }

    #[instrument(skip(self, record), fields(job_id = %job_id))]
    async fn record_archive(&self, job_id: JobId, record: &ArchiveRecord) -> Result<bool, StoreError> {
        let (location, error) = match record {
            ArchiveRecord::Ready(key) => (Some(key.as_str()), None),
            ArchiveRecord::Failed(reason) => (None, Some(reason.as_str())),
        };
        JobRepo::record_archive(&self.pool, job_id.as_uuid(), location, error)
            .await
            .map_err(query_failed)
    }

    async fn stale_pending_tasks(&self, before: Timestamp, limit: usize) -> Result<Vec<Task>, StoreError> {
        let rows = TaskRepo::list_stale_pending(&self.pool, before, to_limit(limit))
            .await
            .map_err(query_failed)?;
        to_tasks(rows)
    }

    async fn stalled_running_tasks(&self, before: Timestamp, limit: usize) -> Result<Vec<Task>, StoreError> {
        let rows = TaskRepo::list_stalled_running(&self.pool, before, to_limit(limit))
            .await
            .map_err(query_failed)?;
        to_tasks(rows)
    }

    async fn unarchived_jobs(&self, before: Timestamp, limit: usize) -> Result<Vec<JobId>, StoreError> {
        let ids = JobRepo::list_unarchived(&self.pool, before, to_limit(limit))
            .await
            .map_err(query_failed)?;
        Ok(ids.into_iter().map(JobId::from_uuid).collect())
    }

    async fn unsettled_jobs(&self, before: Timestamp, limit: usize) -> Result<Vec<JobId>, StoreError> {
        let ids = JobRepo::list_unsettled(&self.pool, before, to_limit(limit))
            .await
            .map_err(query_failed)?;
        Ok(ids.into_iter().map(JobId::from_uuid).collect())
    }
}

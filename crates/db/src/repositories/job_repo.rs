//! Repository for the `jobs` table.

use docshift_core::status::{JobStatus, StatusId, TaskStatus};
use docshift_core::types::Timestamp;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::job::JobRow;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, status_id, created_at, completed_at, \
    archive_location, archive_error, updated_at";

pub struct JobRepo;

impl JobRepo {
    /// Insert a new job row inside `tx`.
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: JobStatus,
        created_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO jobs (id, status_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $3)",
        )
        .bind(id)
        .bind(status.id())
        .bind(created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lock the job row for the rest of `tx` and return its status.
    ///
    /// Every recomputation of a job goes through this lock, which is what
    /// serializes concurrent settlements of the same job.
    pub async fn lock_status(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<StatusId>, sqlx::Error> {
        sqlx::query_scalar::<_, StatusId>("SELECT status_id FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Write a new status. `completed_at` is stamped when the status is terminal.
    pub async fn update_status(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        status: JobStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, \
                 completed_at = CASE WHEN $3 THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.id())
        .bind(status.is_terminal())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Record the archive outcome unless one is already recorded.
    ///
    /// Returns `true` if this call wrote it.
    pub async fn record_archive(
        pool: &PgPool,
        id: Uuid,
        location: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET archive_location = $2, archive_error = $3, updated_at = NOW() \
             WHERE id = $1 AND archive_location IS NULL AND archive_error IS NULL",
        )
        .bind(id)
        .bind(location)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Completed jobs without an archive outcome, oldest first.
    pub async fn list_unarchived(
        pool: &PgPool,
        completed_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM jobs \
             WHERE status_id = $1 \
               AND archive_location IS NULL AND archive_error IS NULL \
               AND completed_at < $2 \
             ORDER BY completed_at ASC \
             LIMIT $3",
        )
        .bind(JobStatus::Completed.id())
        .bind(completed_before)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Open jobs whose tasks have all settled, the last before `settled_before`.
    pub async fn list_unsettled(
        pool: &PgPool,
        settled_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT j.id FROM jobs j \
             WHERE j.status_id IN ($1, $2) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM tasks t \
                   WHERE t.job_id = j.id AND t.status_id IN ($3, $4) \
               ) \
               AND (SELECT MAX(t.finished_at) FROM tasks t WHERE t.job_id = j.id) < $5 \
             ORDER BY j.created_at ASC \
             LIMIT $6",
        )
        .bind(JobStatus::Pending.id())
        .bind(JobStatus::InProgress.id())
        .bind(TaskStatus::Pending.id())
        .bind(TaskStatus::Running.id())
        .bind(settled_before)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

//! Repository for the `tasks` table.
//!
//! Status changes only go through [`TaskRepo::transition`], a conditional
//! `UPDATE` guarded on the current status and attempt count.

use chrono::Utc;
use docshift_core::model::{Task, TaskTransition};
use docshift_core::status::TaskStatus;
use docshift_core::types::Timestamp;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::task::{TaskRow, TaskStatusRow};

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, job_id, position, filename, content_ref, size_bytes, \
    status_id, attempts, output_location, \
    error_class, error_kind, error_message, \
    enqueued_at, started_at, finished_at";

pub struct TaskRepo;

impl TaskRepo {
    /// Insert every task of a new job inside `tx`.
    pub async fn insert_all(
        tx: &mut Transaction<'_, Postgres>,
        tasks: &[Task],
    ) -> Result<(), sqlx::Error> {
        for task in tasks {
            sqlx::query(
                "INSERT INTO tasks \
                     (id, job_id, position, filename, content_ref, size_bytes, \
                      status_id, attempts, enqueued_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(task.id.as_uuid())
            .bind(task.job_id.as_uuid())
            .bind(task.position)
            .bind(&task.filename)
            .bind(task.content_ref.as_str())
            .bind(i64::try_from(task.size_bytes).unwrap_or(i64::MAX))
            .bind(task.status.id())
            .bind(task.attempts)
            .bind(task.enqueued_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Tasks of a job in submission order.
    pub async fn list_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE job_id = $1 ORDER BY position");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Task ids of a job in submission order.
    pub async fn list_ids(pool: &PgPool, job_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>("SELECT id FROM tasks WHERE job_id = $1 ORDER BY position")
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find(
        pool: &PgPool,
        job_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE job_id = $1 AND id = $2");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(job_id)
            .bind(task_id)
            .fetch_optional(pool)
            .await
    }

    /// Apply a conditional transition. Returns `true` if a row was updated.
    pub async fn transition(pool: &PgPool, t: &TaskTransition) -> Result<bool, sqlx::Error> {
        let error = t.error.as_ref();
        let result = sqlx::query(
            "UPDATE tasks \
             SET status_id = $3, \
                 attempts = $4, \
                 output_location = $5, \
                 error_class = $6, \
                 error_kind = $7, \
                 error_message = $8, \
                 enqueued_at = CASE WHEN $11 THEN $14 ELSE enqueued_at END, \
                 started_at = CASE WHEN $12 THEN $14 WHEN $11 THEN NULL ELSE started_at END, \
                 finished_at = CASE WHEN $13 THEN $14 WHEN $12 THEN NULL ELSE finished_at END \
             WHERE job_id = $1 AND id = $2 AND status_id = $9 AND attempts = $10",
        )
        .bind(t.job_id.as_uuid())
        .bind(t.task_id.as_uuid())
        .bind(t.to.id())
        .bind(t.attempt)
        .bind(t.output_location.as_ref().map(|k| k.as_str()))
        .bind(error.map(|e| e.class.as_str()))
        .bind(error.map(|e| e.kind.as_str()))
        .bind(error.map(|e| e.message.as_str()))
        .bind(t.from.id())
        .bind(t.expected_attempts())
        .bind(t.to == TaskStatus::Pending)
        .bind(t.to == TaskStatus::Running)
        .bind(t.to.is_terminal())
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Refresh `enqueued_at` of a task still pending with `attempts` attempts.
    pub async fn touch_enqueued(
        pool: &PgPool,
        job_id: Uuid,
        task_id: Uuid,
        attempts: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tasks SET enqueued_at = NOW() \
             WHERE job_id = $1 AND id = $2 AND status_id = $3 AND attempts = $4",
        )
        .bind(job_id)
        .bind(task_id)
        .bind(TaskStatus::Pending.id())
        .bind(attempts)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Status and attempt count of every task of a job, read inside `tx`.
    pub async fn status_rows(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
    ) -> Result<Vec<TaskStatusRow>, sqlx::Error> {
        sqlx::query_as::<_, TaskStatusRow>(
            "SELECT status_id, attempts FROM tasks WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_all(&mut **tx)
        .await
    }

    /// `PENDING` tasks enqueued before `before`, oldest first.
    pub async fn list_stale_pending(
        pool: &PgPool,
        before: Timestamp,
        limit: i64,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status_id = $1 AND enqueued_at < $2 \
             ORDER BY enqueued_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(TaskStatus::Pending.id())
            .bind(before)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// `RUNNING` tasks started before `before`, oldest first.
    pub async fn list_stalled_running(
        pool: &PgPool,
        before: Timestamp,
        limit: i64,
    ) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status_id = $1 AND started_at < $2 \
             ORDER BY started_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(TaskStatus::Running.id())
            .bind(before)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}

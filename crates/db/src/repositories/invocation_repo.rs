//! Repository for the `task_invocations` queue table.

use std::time::Duration;

use docshift_core::model::TaskInvocation;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::invocation::InvocationRow;

/// Column list for `task_invocations` queries.
const COLUMNS: &str = "\
    id, job_id, task_id, content_ref, attempt, \
    published_at, leased_until, delivery_count";

pub struct InvocationRepo;

impl InvocationRepo {
    pub async fn insert(pool: &PgPool, inv: &TaskInvocation) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO task_invocations (job_id, task_id, content_ref, attempt) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(inv.job_id.as_uuid())
        .bind(inv.task_id.as_uuid())
        .bind(inv.content_ref.as_str())
        .bind(inv.attempt)
        .fetch_one(pool)
        .await
    }

    /// Lease the oldest visible invocation for `lease`.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent consumers never
    /// lease the same row. An expired lease makes the row visible again.
    pub async fn claim_next(
        pool: &PgPool,
        lease: Duration,
    ) -> Result<Option<InvocationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE task_invocations \
             SET leased_until = NOW() + make_interval(secs => $1), \
                 delivery_count = delivery_count + 1 \
             WHERE id = ( \
                 SELECT id FROM task_invocations \
                 WHERE leased_until IS NULL OR leased_until < NOW() \
                 ORDER BY id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, InvocationRow>(&query)
            .bind(lease.as_secs_f64())
            .fetch_optional(pool)
            .await
    }

    /// Remove an acknowledged invocation. Returns `false` if it was already gone.
    pub async fn delete(pool: &PgPool, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM task_invocations WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether an unacknowledged invocation of `attempt` exists for the task.
    pub async fn exists(pool: &PgPool, task_id: Uuid, attempt: i32) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS ( \
                 SELECT 1 FROM task_invocations WHERE task_id = $1 AND attempt = $2 \
             )",
        )
        .bind(task_id)
        .bind(attempt)
        .fetch_one(pool)
        .await
    }

    /// Number of invocations not yet acknowledged.
    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM task_invocations")
            .fetch_one(pool)
            .await
    }
}

//! PostgreSQL adapters for the conversion pipeline.
//!
//! Row models map rows onto domain entities and zero-sized repositories
//! hold the SQL; [`PgRecordStore`] and [`PgTaskQueue`] implement the
//! `docshift-core` ports on top of them.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod queue;
pub mod repositories;
pub mod store;

pub use queue::PgTaskQueue;
pub use store::PgRecordStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or an open transaction) as the first argument.

pub mod invocation_repo;
pub mod job_repo;
pub mod task_repo;

pub use invocation_repo::InvocationRepo;
pub use job_repo::JobRepo;
pub use task_repo::TaskRepo;

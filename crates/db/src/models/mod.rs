//! Row models.
//!
//! Each submodule holds a `FromRow` struct matching a table row and its
//! conversion into the `docshift-core` entity. Conversions fail with
//! [`CoreError`](docshift_core::error::CoreError) when a stored value no
//! longer parses (unknown status id, malformed blob key).

pub mod invocation;
pub mod job;
pub mod task;

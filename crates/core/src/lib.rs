//! Domain core for the bulk document conversion pipeline.
//!
//! Pure types and rules with no I/O: job and task entities, the closed
//! status state machines, the job reduction rule, batch validation,
//! retry classification, deterministic blob naming, and the port traits
//! implemented by the storage, queue, and conversion adapters.

pub mod aggregate;
pub mod batch;
pub mod error;
pub mod model;
pub mod naming;
pub mod ports;
pub mod retry;
pub mod status;
pub mod types;

//! Collaborator ports.
//!
//! The orchestration core talks to persistence, the work queue, blob
//! storage and the conversion engine only through these traits. Each is
//! object-safe and shared as `Arc<dyn Trait>`.

pub mod blob_store;
pub mod converter;
pub mod record_store;
pub mod task_queue;

pub use blob_store::{BlobError, BlobStore};
pub use converter::{ConversionRequest, Converter};
pub use record_store::{RecordStore, StoreError};
pub use task_queue::{Delivery, QueueError, TaskQueue};

//! Job/task orchestration for bulk document conversion.
//!
//! Submission goes through the [`dispatcher`], which persists a job and
//! its tasks before publishing one invocation per task. [`worker`] loops
//! consume invocations, run the conversion engine under a timeout and
//! settle each task; the [`aggregator`] recomputes the owning job after
//! every settlement and hands terminal jobs to the [`archive`] assembler.
//! The [`sweep`] repairs what a crash can leave behind. [`orchestrator`]
//! wires it all together behind the operations an HTTP layer would call.

pub mod aggregator;
pub mod archive;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod libreoffice;
pub mod memory;
pub mod orchestrator;
pub mod storage;
pub mod sweep;
pub mod worker;

pub use config::PipelineConfig;
pub use error::OrchestratorError;
pub use orchestrator::JobOrchestrator;

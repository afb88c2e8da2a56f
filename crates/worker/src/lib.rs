//! Job engine: the registry that owns job state and the executor that
//! drives jobs to a terminal status.
//!
//! - [`JobRegistry`] -- process-wide map of jobs; creates, looks up,
//!   cancels and retires them.
//! - [`JobExecutor`] -- long-lived task pulling jobs off the [`JobQueue`]
//!   and running their SubTasks through a [`Transform`](magetool_pipeline::Transform).

pub mod executor;
pub mod registry;

pub use executor::{ExecutorConfig, JobExecutor};
pub use registry::{JobEntry, JobQueue, JobRegistry, NewJob, RegistryConfig};

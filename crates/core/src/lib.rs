//! Pure domain logic for the magetool media backend.
//!
//! No I/O lives here: ids, the Job / SubTask model and its status rules,
//! batch validation, progress formatting, and file naming helpers shared by
//! the store, pipeline, worker, and API crates.

pub mod batch;
pub mod error;
pub mod hashing;
pub mod job;
pub mod job_events;
pub mod naming;
pub mod progress;
pub mod types;

//! Progress streaming and lifecycle notifications.
//!
//! This crate provides the event plumbing between the job executor and
//! anything observing a job:
//!
//! - [`ProgressChannel`] -- per-job ordered event log with live fan-out to
//!   subscribers. Push streams and poll endpoints are both views over it.
//! - [`Subscription`] -- one subscriber's lazy view: replay, then live
//!   events, ending after the terminal event.
//! - [`ProgressEvent`] -- one incremental status update about a job.
//! - [`EventBus`] -- process-wide broadcast of job lifecycle events
//!   (created / started / finished / retired), scoped by client.

pub mod bus;
pub mod channel;
pub mod event;
pub mod subscription;

pub use bus::{EventBus, LifecycleEvent};
pub use channel::{ChannelConfig, ProgressChannel, PublishError};
pub use event::{EventKind, ProgressEvent, Stage, TransferStats};
pub use subscription::Subscription;

//! Lifecycle notification routing.
//!
//! The [`NotificationRouter`] subscribes to the event bus and forwards each
//! job lifecycle event to the WebSocket connections of the job's client.

pub mod router;

pub use router::NotificationRouter;

//! WebSocket infrastructure for real-time delivery.
//!
//! Provides connection management, heartbeat monitoring, and the HTTP
//! upgrade handlers: a client-scoped notification socket and a per-job
//! progress socket.

mod handler;
pub mod heartbeat;
pub mod manager;
mod task;

pub use handler::ws_handler;
pub use manager::WsManager;
pub use task::task_ws_handler;

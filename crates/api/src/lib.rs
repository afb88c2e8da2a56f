//! Magetool API server library.
//!
//! Exposes the building blocks (config, engine wiring, state, error
//! handling, routes, WebSocket infrastructure) so integration tests and the
//! binary entrypoint share them.

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod notifications;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;

//! Request extractors shared by handlers.
//!
//! - [`client::ClientId`] -- The caller's client identifier.

pub mod client;

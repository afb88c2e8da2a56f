//! HTTP request handlers.

pub mod download;
pub mod jobs;
pub mod media;
pub mod stream;

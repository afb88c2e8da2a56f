//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{jobs, stream};
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// GET    /{id}            -> get_job
/// GET    /{id}/events     -> list_events
/// GET    /{id}/stream     -> stream_job
/// POST   /{id}/cancel     -> cancel_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/events", get(jobs::list_events))
        .route("/{id}/stream", get(stream::stream_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
}

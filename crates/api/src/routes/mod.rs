pub mod download;
pub mod health;
pub mod jobs;
pub mod media;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                                 lifecycle notifications (WebSocket)
///
/// /jobs                               list (client-scoped)
/// /jobs/{id}                          snapshot + latest event
/// /jobs/{id}/events                   event log, ?after=<seq>
/// /jobs/{id}/stream                   SSE, resumable via Last-Event-ID
/// /jobs/{id}/cancel                   cancel (POST, owner only)
///
/// /task/{id}/status                   legacy poll view
/// /download/{filename}                artifact download
///
/// /{domain}/{operation}               submit (POST, multipart)
/// /{domain}/{operation}-stream        URL job with inline SSE (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // WebSocket notifications.
        .route("/ws", get(ws::ws_handler))
        // Job resource.
        .nest("/jobs", jobs::router())
        // Legacy task status.
        .route("/task/{id}/status", get(handlers::jobs::task_status))
        // Downloads.
        .merge(download::router())
        // Media operations. Registered last so the literal prefixes above win.
        .merge(media::router())
}

/// Root-level WebSocket routes.
///
/// ```text
/// /ws/task/{id}                       per-job progress (WebSocket)
/// ```
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws/task/{id}", get(ws::task_ws_handler))
}

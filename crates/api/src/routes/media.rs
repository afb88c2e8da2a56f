//! Route definitions for the media operations.

use axum::routing::get;
use axum::Router;

use crate::handlers::{media, stream};
use crate::state::AppState;

/// ```text
/// POST   /{domain}/{operation}            -> submit
/// GET    /{domain}/{operation}-stream     -> stream_operation
/// ```
///
/// The path router cannot match a literal suffix inside a segment, so the
/// GET handler checks for `-stream` itself.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{domain}/{operation}",
        get(stream::stream_operation).post(media::submit),
    )
}

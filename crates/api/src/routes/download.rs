use axum::routing::get;
use axum::Router;

use crate::handlers::download;
use crate::state::AppState;

/// ```text
/// GET    /download/{filename}     -> download
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/download/{filename}", get(download::download))
}

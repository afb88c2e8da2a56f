//! Artifact downloads.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use magetool_core::naming;
use magetool_core::types::ArtifactId;
use magetool_store::StoreError;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// File name to suggest to the browser.
    pub download_name: Option<String>,
}

/// GET /api/download/{filename}?download_name=...
///
/// Streams a stored artifact as an attachment. The read lease is held for
/// the whole response, so an artifact expiring mid-download is still
/// delivered in full. Expired or unknown artifacts are 404.
pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> AppResult<Response> {
    let id = ArtifactId::parse(&filename).ok_or_else(|| StoreError::NotFound(filename.clone()))?;
    let handle = state.store.open_artifact(&id).await?;
    let meta = handle.meta().clone();

    let requested = query
        .download_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&meta.original_name);
    let download_name = naming::ensure_extension(requested, id.as_str());

    let file = handle.open_file().await?;
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _lease = &handle;
        chunk
    });

    tracing::debug!(artifact_id = %id, size = meta.size_bytes, "Serving download");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, meta.content_type.as_str())
        .header(header::CONTENT_LENGTH, meta.size_bytes.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            naming::content_disposition(&download_name),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

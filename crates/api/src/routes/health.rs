use axum::extract::State;
use axum::{routing::get, Json, Router};
use magetool_store::ArtifactStore;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status: `ok`, or `degraded` when storage is full.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub jobs: JobHealth,
    pub storage: StorageHealth,
    pub websocket_connections: usize,
}

#[derive(Debug, Serialize)]
pub struct JobHealth {
    pub total: usize,
    pub active: usize,
}

#[derive(Debug, Serialize)]
pub struct StorageHealth {
    pub artifacts: usize,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

/// GET /health -- service, job, and storage health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let available_bytes = state.store.available_bytes();
    let status = if available_bytes > 0 { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        jobs: JobHealth {
            total: state.registry.len().await,
            active: state.registry.active_count().await,
        },
        storage: StorageHealth {
            artifacts: state.store.artifact_count().await,
            used_bytes: state.store.used_bytes(),
            available_bytes,
        },
        websocket_connections: state.ws_manager.connection_count().await,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

//! Handlers for the `/jobs` resource and the legacy task views.
//!
//! Reads are keyed by the unguessable job id alone, so polling clients
//! that never send a client id still work. Listing and cancelling are
//! scoped to the calling client.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use magetool_core::error::CoreError;
use magetool_core::job::JobSnapshot;
use magetool_core::types::JobId;
use magetool_events::ProgressEvent;
use magetool_worker::JobEntry;

use crate::error::AppResult;
use crate::handlers::stream::ReplayQuery;
use crate::middleware::client::ClientId;
use crate::response::{DataResponse, JobView, TaskStatus};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a job id from the path and look the job up.
///
/// A malformed id is reported as not found, like an unknown one.
pub async fn find_job(state: &AppState, raw_id: &str) -> AppResult<Arc<JobEntry>> {
    let id = parse_job_id(raw_id)?;
    Ok(state.registry.get_entry(id).await?)
}

fn parse_job_id(raw_id: &str) -> Result<JobId, CoreError> {
    JobId::parse(raw_id).ok_or_else(|| CoreError::not_found("Job", raw_id))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/jobs
///
/// The calling client's jobs, newest first.
pub async fn list_jobs(
    client: ClientId,
    State(state): State<AppState>,
) -> Json<DataResponse<Vec<JobSnapshot>>> {
    let jobs = state.registry.list_for_client(client.as_str()).await;
    Json(DataResponse { data: jobs })
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/jobs/{id}
///
/// Snapshot of one job plus its latest progress event. This is the poll
/// fallback for clients that cannot hold a stream open.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<JobView>>> {
    let entry = find_job(&state, &id).await?;
    let view = JobView {
        job: entry.snapshot(),
        latest_event: entry.channel().latest().map(|e| (*e).clone()),
    };
    Ok(Json(DataResponse { data: view }))
}

/// GET /api/jobs/{id}/events?after=<seq>
///
/// Logged events with a sequence number above `after` (all retained
/// events when omitted). Repeated with the last seen `seq`, this gives
/// incremental polling over the same log the streams read.
pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReplayQuery>,
) -> AppResult<Json<DataResponse<Vec<ProgressEvent>>>> {
    let entry = find_job(&state, &id).await?;
    let events = entry
        .channel()
        .events_since(query.after)
        .into_iter()
        .map(|e| (*e).clone())
        .collect();
    Ok(Json(DataResponse { data: events }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/jobs/{id}/cancel
///
/// Stops the job from starting further SubTasks; SubTasks already running
/// finish. Only the owning client may cancel.
pub async fn cancel_job(
    client: ClientId,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<JobSnapshot>>> {
    let id = parse_job_id(&id)?;
    let snapshot = state.registry.cancel(id, client.as_str()).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

// ---------------------------------------------------------------------------
// Legacy task status
// ---------------------------------------------------------------------------

/// GET /api/task/{id}/status
///
/// `{status, progress, ready, message, result}` for polling clients.
pub async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<TaskStatus>> {
    let entry = find_job(&state, &id).await?;
    let latest = entry.channel().latest();
    let status = TaskStatus::new(&entry.snapshot(), latest.as_deref(), entry.outcome());
    Ok(Json(status))
}

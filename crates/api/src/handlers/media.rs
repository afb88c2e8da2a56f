//! Handlers for `POST /api/{domain}/{operation}` submissions.
//!
//! A submission is validated in full (operation, parameters, batch size,
//! client limit) before any job exists. Uploaded files are stored as
//! input artifacts and become one SubTask each.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use magetool_core::batch::{validate_batch_size, validate_source_url, MAX_FILES};
use magetool_core::error::CoreError;
use magetool_core::job::{JobOutcome, SubTaskInput};
use magetool_core::naming;
use magetool_core::types::{ArtifactId, JobId};
use magetool_pipeline::{InputMode, Operation, Params};
use magetool_store::{ArtifactStore, NewArtifact};
use magetool_worker::{JobRegistry, NewJob};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::client::ClientId;
use crate::response::{AcceptedResponse, SubmitResponse};
use crate::state::AppState;

/// Multipart field carrying one of several files.
pub const FIELD_FILES: &str = "files";

/// Multipart field carrying a lone file.
pub const FIELD_FILE: &str = "file";

/// Query value selecting asynchronous submission.
pub const MODE_ASYNC: &str = "async";

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    /// `async` returns `202` right after the job is created.
    pub mode: Option<String>,
}

/// One file read from the multipart body.
#[derive(Debug)]
struct Upload {
    name: String,
    content_type: String,
    data: Bytes,
}

/// Everything a submission carried.
#[derive(Debug, Default)]
struct Submission {
    uploads: Vec<Upload>,
    params: Params,
    /// Whether the files came in a `file` field rather than `files`.
    single: bool,
}

async fn read_submission(mut multipart: Multipart) -> AppResult<Submission> {
    let mut submission = Submission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FIELD_FILES | FIELD_FILE => {
                // Reject oversized batches before buffering more bytes.
                if submission.uploads.len() >= MAX_FILES {
                    validate_batch_size(submission.uploads.len() + 1)?;
                }
                let file_name = field
                    .file_name()
                    .map(naming::sanitize_file_name)
                    .unwrap_or_else(|| "upload".to_string());
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .or_else(|| {
                        naming::extension_of(&file_name)
                            .map(|ext| naming::content_type_for_extension(&ext).to_string())
                    })
                    .unwrap_or_else(|| naming::OCTET_STREAM.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                if name == FIELD_FILE {
                    submission.single = true;
                }
                submission.uploads.push(Upload {
                    name: file_name,
                    content_type,
                    data,
                });
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                submission.params.insert(name, value);
            }
        }
    }

    // A lone upload sent as `files` is still a batch of one.
    submission.single = submission.single && submission.uploads.len() == 1;
    Ok(submission)
}

// ---------------------------------------------------------------------------
// Shared job creation
// ---------------------------------------------------------------------------

/// Create a job for one source URL. Used by submissions and the stream
/// endpoint.
pub async fn create_url_job(
    registry: &JobRegistry,
    client_id: &str,
    operation: Operation,
    route: String,
    url: &str,
) -> Result<JobId, CoreError> {
    validate_source_url(url)?;
    registry
        .create_job(NewJob {
            client_id: client_id.to_string(),
            operation,
            route,
            inputs: vec![SubTaskInput::Url {
                url: url.trim().to_string(),
            }],
        })
        .await
}

/// Store every upload as an input artifact.
///
/// On failure the artifacts already written are removed again.
async fn store_uploads(
    state: &AppState,
    client_id: &str,
    uploads: Vec<Upload>,
) -> AppResult<Vec<SubTaskInput>> {
    let mut inputs = Vec::with_capacity(uploads.len());
    for upload in uploads {
        if upload.data.is_empty() {
            discard_inputs(state, &inputs).await;
            return Err(AppError::Core(CoreError::Validation(format!(
                "File '{}' is empty",
                upload.name
            ))));
        }
        let new = NewArtifact::new(client_id, upload.name.clone(), upload.content_type.clone())
            .with_ttl(state.config.input_ttl());
        match state.store.put(&upload.data, new).await {
            Ok(meta) => inputs.push(SubTaskInput::Artifact {
                artifact_id: meta.id,
                original_name: upload.name,
                content_type: upload.content_type,
            }),
            Err(e) => {
                discard_inputs(state, &inputs).await;
                return Err(e.into());
            }
        }
    }
    Ok(inputs)
}

async fn discard_inputs(state: &AppState, inputs: &[SubTaskInput]) {
    for input in inputs {
        if let SubTaskInput::Artifact { artifact_id, .. } = input {
            discard_artifact(state, artifact_id).await;
        }
    }
}

async fn discard_artifact(state: &AppState, id: &ArtifactId) {
    if let Err(e) = state.store.delete(id).await {
        tracing::warn!(artifact_id = %id, error = %e, "Failed to discard input artifact");
    }
}

/// Wait for the job's terminal event.
pub async fn wait_for_outcome(
    registry: &JobRegistry,
    job_id: JobId,
) -> AppResult<JobOutcome> {
    let entry = registry.get_entry(job_id).await?;
    let mut subscription = entry.channel().subscribe();
    while let Some(event) = subscription.next().await {
        if event.is_terminal() {
            break;
        }
    }
    entry
        .outcome()
        .ok_or_else(|| AppError::InternalError(format!("Job {job_id} ended without an outcome")))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/{domain}/{operation}
///
/// Multipart body with 1..=40 `files` (or one `file`) plus string
/// parameters; URL operations take a `url` parameter instead of files.
///
/// Waits for the job and returns its results, or with `?mode=async`
/// returns `202` with the job id at once. A job still running when the
/// synchronous wait runs out is also answered with `202`.
pub async fn submit(
    client: ClientId,
    State(state): State<AppState>,
    Path((domain, operation)): Path<(String, String)>,
    Query(query): Query<SubmitQuery>,
    multipart: Multipart,
) -> AppResult<Response> {
    let submission = read_submission(multipart).await?;
    let op = Operation::parse(&domain, &operation, &submission.params)?;
    let route = format!("{domain}/{operation}");

    let (job_id, single) = match op.input_mode() {
        InputMode::Url => {
            let url = submission.params.get("url").map(String::as_str).unwrap_or_default();
            let id = create_url_job(&state.registry, client.as_str(), op, route, url).await?;
            (id, true)
        }
        InputMode::Files => {
            validate_batch_size(submission.uploads.len())?;
            let single = submission.single;
            let inputs = store_uploads(&state, client.as_str(), submission.uploads).await?;
            let new = NewJob {
                client_id: client.0.clone(),
                operation: op,
                route,
                inputs: inputs.clone(),
            };
            match state.registry.create_job(new).await {
                Ok(id) => (id, single),
                Err(e) => {
                    discard_inputs(&state, &inputs).await;
                    return Err(e.into());
                }
            }
        }
    };

    if query.mode.as_deref() == Some(MODE_ASYNC) {
        return Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::new(job_id))).into_response());
    }

    let waited = tokio::time::timeout(
        state.config.sync_wait(),
        wait_for_outcome(&state.registry, job_id),
    )
    .await;
    let Ok(outcome) = waited else {
        tracing::info!(job_id = %job_id, "Job outlived the synchronous wait; answering 202");
        return Ok((StatusCode::ACCEPTED, Json(AcceptedResponse::new(job_id))).into_response());
    };
    let outcome = outcome?;
    let body = SubmitResponse::from_outcome(job_id, &outcome, single);
    let status = if body.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(body)).into_response())
}

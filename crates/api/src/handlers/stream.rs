//! Server-sent event views over a job's progress channel.
//!
//! - `GET /api/{domain}/{operation}-stream?url=` creates a URL job and
//!   streams its progress in the flat download-progress shape, with
//!   `<job id>:<seq>` SSE ids so reconnects resume the same job.
//! - `GET /api/jobs/{id}/stream` streams any job's raw progress events,
//!   with the event sequence number as the SSE id.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use magetool_core::error::CoreError;
use magetool_core::types::JobId;
use magetool_events::Subscription;
use magetool_pipeline::{InputMode, Operation, Params};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::handlers::jobs::find_job;
use crate::handlers::media::create_url_job;
use crate::middleware::client::ClientId;
use crate::response::StreamMessage;
use crate::state::AppState;

/// Suffix marking the streaming variant of an operation route.
pub const STREAM_SUFFIX: &str = "-stream";

/// Header an `EventSource` sends when it reconnects.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub url: Option<String>,
    /// Follow an existing job instead of creating one.
    pub job_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplayQuery {
    /// Replay events with a sequence number above this one.
    pub after: Option<u64>,
}

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

fn sse(stream: EventStream) -> Response {
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn json_event<T: Serialize>(payload: &T) -> Event {
    Event::default().json_data(payload).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize stream payload");
        Event::default().data(r#"{"status":"error","error":"Malformed event"}"#)
    })
}

/// SSE id of a `-stream` message: `<job id>:<seq>`.
///
/// An `EventSource` reconnects to the same URL with this as
/// `Last-Event-ID`, which is enough to find the job and the resume point.
pub fn resume_token(job_id: JobId, seq: u64) -> String {
    format!("{job_id}:{seq}")
}

pub fn parse_resume_token(raw: &str) -> Option<(JobId, u64)> {
    let (job_id, seq) = raw.trim().rsplit_once(':')?;
    Some((JobId::parse(job_id)?, seq.parse().ok()?))
}

fn rejected_stream(message: String) -> Response {
    let event = json_event(&StreamMessage::rejected(message));
    sse(stream::once(async move { Ok(event) }).boxed())
}

fn operation_events(job_id: JobId, subscription: Subscription) -> Response {
    let events = subscription
        .into_stream()
        .map(move |event| {
            Ok(json_event(&StreamMessage::from_event(&event)).id(resume_token(job_id, event.seq)))
        })
        .boxed();
    sse(events)
}

/// GET /api/{domain}/{operation}-stream?url=...&client_id=...
///
/// Creates a job for one source URL and streams its progress until the
/// terminal event. Every message names the job, so a client that loses
/// the stream can poll `/api/jobs/{id}` instead.
///
/// A request carrying `Last-Event-ID` (or `job_id`) resumes that job's
/// stream rather than starting a new download. A request that cannot
/// become a job still gets a stream: a single `error` message, so
/// event-stream clients see the reason.
pub async fn stream_operation(
    client: ClientId,
    State(state): State<AppState>,
    Path((domain, operation)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if !operation.ends_with(STREAM_SUFFIX) {
        return Err(CoreError::not_found("Route", format!("{domain}/{operation}")).into());
    }

    let resume = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_resume_token);
    if let Some((job_id, after)) = resume {
        return Ok(match state.registry.get_entry(job_id).await {
            Ok(entry) => {
                tracing::debug!(job_id = %job_id, after, "Resuming operation stream");
                operation_events(job_id, entry.channel().subscribe_after(after))
            }
            Err(e) => rejected_stream(e.to_string()),
        });
    }
    if let Some(raw) = query.job_id.as_deref() {
        return Ok(match find_job(&state, raw).await {
            Ok(entry) => operation_events(entry.id, entry.channel().subscribe()),
            Err(e) => rejected_stream(e.to_string()),
        });
    }

    let url = query.url.unwrap_or_default();
    let created = async {
        let mut params = Params::new();
        params.insert("url".to_string(), url.clone());
        let op = Operation::parse(&domain, &operation, &params)?;
        if op.input_mode() != InputMode::Url {
            return Err(CoreError::Validation(format!(
                "{domain}/{operation} does not take a source URL"
            )));
        }
        let route = format!("{domain}/{}", operation.trim_end_matches(STREAM_SUFFIX));
        create_url_job(&state.registry, client.as_str(), op, route, &url).await
    }
    .await;

    let job_id = match created {
        Ok(id) => id,
        Err(e) => {
            tracing::debug!(client_id = %client.as_str(), error = %e, "Stream request rejected");
            let message = match e {
                CoreError::Validation(msg) | CoreError::Conflict(msg) => msg,
                other => other.to_string(),
            };
            return Ok(rejected_stream(message));
        }
    };

    // Replay from the start: the executor may already have begun the job.
    let entry = state.registry.get_entry(job_id).await?;
    Ok(operation_events(job_id, entry.channel().subscribe_from_start()))
}

/// GET /api/jobs/{id}/stream?after=<seq>
///
/// Raw progress events as SSE. Reconnecting clients resume with the
/// `Last-Event-ID` header or `after`; otherwise the stream starts at the
/// latest event.
pub async fn stream_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ReplayQuery>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let entry = find_job(&state, &id).await?;
    let after = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or(query.after);

    let subscription = match after {
        Some(after) => entry.channel().subscribe_after(after),
        None => entry.channel().subscribe(),
    };
    let events = subscription
        .into_stream()
        .map(|event| Ok(json_event(&*event).id(event.seq.to_string())))
        .boxed();
    Ok(sse(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_token_round_trips() {
        let id = JobId::new();
        assert_eq!(parse_resume_token(&resume_token(id, 7)), Some((id, 7)));
    }

    #[test]
    fn bare_sequence_numbers_are_not_resume_tokens() {
        assert_eq!(parse_resume_token("7"), None);
        assert_eq!(parse_resume_token("not-a-job:7"), None);
        assert_eq!(parse_resume_token(&format!("{}:x", JobId::new())), None);
    }
}

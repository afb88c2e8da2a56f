use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use magetool_worker::JobEntry;

use crate::error::AppResult;
use crate::handlers::jobs::find_job;
use crate::response::TaskUpdate;
use crate::state::AppState;
use crate::ws::manager::{SocketKind, WsManager};

/// How long a closing socket gets to flush its final frames.
const CLOSE_FLUSH: Duration = Duration::from_secs(1);

/// GET /ws/task/{id}
///
/// Upgrades to a WebSocket pushing `{status, progress, message, result}`
/// for one job, starting at its latest event. The server closes the
/// socket after the terminal event.
pub async fn task_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let entry = find_job(&state, &id).await?;
    Ok(ws.on_upgrade(move |socket| handle_task_socket(socket, state.ws_manager, entry)))
}

async fn handle_task_socket(socket: WebSocket, ws_manager: Arc<WsManager>, entry: Arc<JobEntry>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut rx = ws_manager
        .add(conn_id.clone(), entry.client_id.clone(), SocketKind::Task(entry.id))
        .await;
    let watchers = ws_manager.task_watchers(entry.id).await;
    tracing::debug!(conn_id = %conn_id, job_id = %entry.id, watchers, "Task WebSocket connected");
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let mut subscription = entry.channel().subscribe();
    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                let update = TaskUpdate::from_event(&event, entry.state().progress());
                if !ws_manager.send_json(&conn_id, &update).await {
                    break;
                }
                if event.is_terminal() {
                    ws_manager.send_to(&conn_id, Message::Close(None)).await;
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Task WebSocket receive error");
                    break;
                }
            },
        }
    }

    if subscription.missed() > 0 {
        tracing::debug!(
            conn_id = %conn_id,
            missed = subscription.missed(),
            "Task WebSocket skipped events while lagging"
        );
    }

    // Dropping the manager's sender lets the sender task drain and stop.
    ws_manager.remove(&conn_id).await;
    if tokio::time::timeout(CLOSE_FLUSH, &mut send_task).await.is_err() {
        send_task.abort();
    }
    tracing::debug!(conn_id = %conn_id, "Task WebSocket disconnected");
}

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::middleware::client::ClientId;
use crate::state::AppState;
use crate::ws::manager::{SocketKind, WsManager};

/// GET /api/ws?client_id=...
///
/// Upgrades to a push-only socket carrying `job.created`, `job.started`,
/// `job.finished` and `job.retired` notifications for the caller's jobs.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    client: ClientId,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| lifecycle_socket(socket, state.ws_manager, client.0))
}

/// Drive one lifecycle socket until the peer leaves.
///
/// Outbound frames come from the [`WsManager`] queue (filled by the
/// notification router and the heartbeat). Inbound frames are read only
/// to notice Close and transport errors.
async fn lifecycle_socket(socket: WebSocket, ws_manager: Arc<WsManager>, client_id: String) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut outbound = ws_manager
        .add(conn_id.clone(), client_id.clone(), SocketKind::Lifecycle)
        .await;
    tracing::info!(conn_id = %conn_id, client_id = %client_id, "Lifecycle WebSocket connected");

    let (mut sink, mut inbound) = socket.split();
    let forward = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => tracing::trace!(conn_id = %conn_id, "Pong"),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "Lifecycle WebSocket receive error");
                break;
            }
        }
    }

    ws_manager.remove(&conn_id).await;
    forward.abort();
    tracing::info!(conn_id = %conn_id, "Lifecycle WebSocket disconnected");
}

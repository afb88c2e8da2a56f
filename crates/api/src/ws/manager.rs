use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use magetool_core::types::{ClientId, JobId};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

/// Outbound half of a connection's message queue.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// What a socket was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// `/api/ws`: lifecycle notifications for every job of the client.
    Lifecycle,
    /// `/ws/task/{id}`: progress updates for one job.
    Task(JobId),
}

struct Connection {
    client_id: ClientId,
    kind: SocketKind,
    sender: WsSender,
}

/// Registry of open WebSocket connections, keyed by connection id.
///
/// Shared behind an `Arc`; each upgrade handler registers its socket here
/// and drains the returned receiver into the socket sink.
#[derive(Default)]
pub struct WsManager {
    connections: RwLock<HashMap<String, Connection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the receiver its sender task drains.
    pub async fn add(
        &self,
        conn_id: String,
        client_id: ClientId,
        kind: SocketKind,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (sender, rx) = mpsc::unbounded_channel();
        let conn = Connection {
            client_id,
            kind,
            sender,
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    pub async fn remove(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Lifecycle connection ids of a client.
    pub async fn get_by_client(&self, client_id: &str) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, conn)| conn.is_lifecycle_of(client_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Queue a frame on one connection.
    ///
    /// Returns `false` if the connection is unknown or its socket has gone.
    pub async fn send_to(&self, conn_id: &str, message: Message) -> bool {
        self.connections
            .read()
            .await
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    /// Queue `payload` as a JSON text frame on one connection.
    pub async fn send_json<T: Serialize>(&self, conn_id: &str, payload: &T) -> bool {
        match serde_json::to_string(payload) {
            Ok(text) => self.send_to(conn_id, Message::Text(text.into())).await,
            Err(e) => {
                tracing::error!(conn_id, error = %e, "Failed to serialize WebSocket payload");
                false
            }
        }
    }

    /// Queue a frame on every lifecycle connection of a client.
    ///
    /// Task sockets of the same client are left alone. Returns how many
    /// connections accepted the frame.
    pub async fn send_to_client(&self, client_id: &str, message: Message) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.is_lifecycle_of(client_id))
            .filter(|conn| conn.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Number of task sockets currently following `job_id`.
    pub async fn task_watchers(&self, job_id: JobId) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.kind == SocketKind::Task(job_id))
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Ping every connection. Sockets whose peer stopped reading fail
    /// on their next write and unregister themselves.
    pub async fn ping_all(&self) {
        for conn in self.connections.read().await.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }

    /// Queue a Close frame on every connection and forget them all.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        tracing::info!(count = conns.len(), "Closed all WebSocket connections");
        conns.clear();
    }
}

impl Connection {
    fn is_lifecycle_of(&self, client_id: &str) -> bool {
        self.kind == SocketKind::Lifecycle && self.client_id == client_id
    }
}

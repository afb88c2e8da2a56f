use std::sync::Arc;

use magetool_events::EventBus;
use magetool_store::LocalArtifactStore;
use magetool_worker::JobRegistry;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Every live job, with its progress channel.
    pub registry: Arc<JobRegistry>,
    /// Uploaded inputs and produced outputs.
    pub store: Arc<LocalArtifactStore>,
    /// WebSocket connection manager (browser clients).
    pub ws_manager: Arc<WsManager>,
    /// Job lifecycle notifications.
    pub event_bus: Arc<EventBus>,
}

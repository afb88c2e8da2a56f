use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

/// Time between pings on idle and busy sockets alike.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Ping every open socket each `every` until `cancel` fires.
///
/// Proxies drop connections that stay silent, and long jobs can go
/// minutes without a lifecycle event.
pub async fn run(ws_manager: Arc<WsManager>, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing is open yet.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("WebSocket heartbeat stopped");
                break;
            }
            _ = interval.tick() => {
                let count = ws_manager.connection_count().await;
                if count > 0 {
                    tracing::trace!(count, "WebSocket heartbeat ping");
                    ws_manager.ping_all().await;
                }
            }
        }
    }
}

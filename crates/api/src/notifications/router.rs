//! Event-to-WebSocket routing.
//!
//! [`NotificationRouter`] subscribes to the lifecycle [`EventBus`] and pushes
//! each event, serialized as JSON, to every WebSocket connection opened by
//! the job's client.
//!
//! [`EventBus`]: magetool_events::EventBus

use std::sync::Arc;

use axum::extract::ws::Message;
use magetool_core::batch::ANONYMOUS_CLIENT;
use magetool_events::LifecycleEvent;
use tokio::sync::broadcast;

use crate::ws::WsManager;

/// Routes lifecycle events to client WebSocket connections.
pub struct NotificationRouter {
    ws_manager: Arc<WsManager>,
}

impl NotificationRouter {
    pub fn new(ws_manager: Arc<WsManager>) -> Self {
        Self { ws_manager }
    }

    /// Run the routing loop.
    ///
    /// Exits when the channel is closed (i.e. the
    /// [`EventBus`](magetool_events::EventBus) is dropped).
    pub async fn run(self, mut receiver: broadcast::Receiver<LifecycleEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.route_event(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notification router shutting down");
                    break;
                }
            }
        }
    }

    /// Deliver one event to the owning client's connections.
    ///
    /// Returns the number of connections reached. Anonymous jobs are never
    /// delivered, since every anonymous socket shares the same client id.
    pub async fn route_event(&self, event: &LifecycleEvent) -> usize {
        if event.client_id == ANONYMOUS_CLIENT {
            return 0;
        }

        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    event_type = %event.event_type,
                    "Failed to serialize lifecycle event"
                );
                return 0;
            }
        };

        let delivered = self
            .ws_manager
            .send_to_client(&event.client_id, Message::Text(text.into()))
            .await;
        tracing::trace!(
            event_type = %event.event_type,
            job_id = %event.job_id,
            delivered,
            "Lifecycle event routed"
        );
        delivered
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use magetool_core::job_events::{EVENT_JOB_CREATED, EVENT_JOB_FINISHED};
    use magetool_core::types::JobId;
    use magetool_events::EventBus;

    use super::*;
    use crate::ws::manager::SocketKind;

    #[tokio::test]
    async fn delivers_only_to_owning_client() {
        let ws = Arc::new(WsManager::new());
        let mut alice = ws.add("c1".into(), "alice".into(), SocketKind::Lifecycle).await;
        let mut bob = ws.add("c2".into(), "bob".into(), SocketKind::Lifecycle).await;
        let router = NotificationRouter::new(Arc::clone(&ws));

        let event = LifecycleEvent::new(EVENT_JOB_CREATED, JobId::new(), "alice");
        assert_eq!(router.route_event(&event).await, 1);

        let Some(Message::Text(text)) = alice.recv().await else {
            panic!("expected a text frame");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json["event_type"], EVENT_JOB_CREATED);
        assert_eq!(json["client_id"], "alice");
        assert!(bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn task_sockets_do_not_receive_lifecycle_events() {
        let ws = Arc::new(WsManager::new());
        let job_id = JobId::new();
        let mut task = ws.add("c1".into(), "alice".into(), SocketKind::Task(job_id)).await;
        let router = NotificationRouter::new(Arc::clone(&ws));

        let event = LifecycleEvent::new(EVENT_JOB_FINISHED, job_id, "alice");
        assert_eq!(router.route_event(&event).await, 0);
        assert!(task.try_recv().is_err());
    }

    #[tokio::test]
    async fn anonymous_events_are_not_delivered() {
        let ws = Arc::new(WsManager::new());
        let mut anon = ws.add("c1".into(), ANONYMOUS_CLIENT.into(), SocketKind::Lifecycle)
            .await;
        let router = NotificationRouter::new(Arc::clone(&ws));

        let event = LifecycleEvent::new(EVENT_JOB_FINISHED, JobId::new(), ANONYMOUS_CLIENT);
        assert_eq!(router.route_event(&event).await, 0);
        assert!(anon.try_recv().is_err());
    }

    #[tokio::test]
    async fn run_exits_when_bus_dropped() {
        let ws = Arc::new(WsManager::new());
        let mut conn = ws.add("c1".into(), "alice".into(), SocketKind::Lifecycle).await;
        let bus = EventBus::default();
        let handle = tokio::spawn(NotificationRouter::new(Arc::clone(&ws)).run(bus.subscribe()));

        bus.publish(LifecycleEvent::new(EVENT_JOB_FINISHED, JobId::new(), "alice"));
        drop(bus);

        handle.await.unwrap();
        assert!(matches!(conn.recv().await, Some(Message::Text(_))));
    }
}

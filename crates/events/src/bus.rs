//! In-process lifecycle event bus backed by a `tokio::sync::broadcast`
//! channel.
//!
//! [`EventBus`] carries coarse job lifecycle notifications (created,
//! started, finished, retired) to anything interested in more than one job,
//! such as the client-scoped WebSocket router. Per-job progress goes through
//! [`ProgressChannel`](crate::ProgressChannel) instead.

use chrono::{DateTime, Utc};
use magetool_core::types::{ClientId, JobId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

/// A job lifecycle notification.
///
/// Constructed via [`LifecycleEvent::new`] and enriched with
/// [`with_payload`](LifecycleEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Dot-separated event name, e.g. `"job.finished"`.
    pub event_type: String,

    pub job_id: JobId,

    /// Client that owns the job. Routing key for delivery.
    pub client_id: ClientId,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(event_type: impl Into<String>, job_id: JobId, client_id: impl Into<ClientId>) -> Self {
        Self {
            event_type: event_type.into(),
            job_id,
            client_id: client_id.into(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use magetool_core::types::JobId;
/// use magetool_events::bus::{EventBus, LifecycleEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(LifecycleEvent::new("job.created", JobId::new(), "client-1"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: LifecycleEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let job_id = JobId::new();

        bus.publish(
            LifecycleEvent::new("job.finished", job_id, "client-7")
                .with_payload(serde_json::json!({"status": "completed"})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "job.finished");
        assert_eq!(received.job_id, job_id);
        assert_eq!(received.client_id, "client-7");
        assert_eq!(received.payload["status"], "completed");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(LifecycleEvent::new("job.created", JobId::new(), "c"));

        assert_eq!(rx1.recv().await.unwrap().event_type, "job.created");
        assert_eq!(rx2.recv().await.unwrap().event_type, "job.created");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(LifecycleEvent::new("job.retired", JobId::new(), "c"));
    }
}

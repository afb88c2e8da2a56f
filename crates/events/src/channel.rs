//! Per-job progress channel.
//!
//! A [`ProgressChannel`] is the single source of truth for one job's
//! progress. It keeps a bounded, ordered event log (for polling) and fans
//! every event out over a `tokio::sync::broadcast` channel (for live
//! streams). Publishing never waits on subscribers: a subscriber that falls
//! behind loses intermediate events, never the terminal one, because the
//! terminal event is the last thing ever sent and the broadcast ring always
//! retains the newest entries.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use magetool_core::types::JobId;
use tokio::sync::broadcast;

use crate::event::{EventKind, ProgressEvent};
use crate::subscription::Subscription;

/// Default number of events retained in the log.
pub const DEFAULT_LOG_CAPACITY: usize = 256;

/// Default per-subscriber buffer, in events.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Sizing for a [`ProgressChannel`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Events retained in the log. When exceeded, the oldest `progress`
    /// entries are dropped; `starting` and terminal entries are kept.
    pub log_capacity: usize,
    /// Events a subscriber may fall behind before it starts missing some.
    pub subscriber_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
        }
    }
}

/// Returned when publishing to a channel that already carries its terminal
/// event.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Progress channel for job {0} is already terminated")]
pub struct PublishError(pub JobId);

struct ChannelLog {
    events: VecDeque<Arc<ProgressEvent>>,
    next_seq: u64,
    latest: Option<Arc<ProgressEvent>>,
    terminal: Option<Arc<ProgressEvent>>,
}

/// Ordered event log plus live fan-out for one job.
pub struct ProgressChannel {
    job_id: JobId,
    log_capacity: usize,
    log: Mutex<ChannelLog>,
    sender: broadcast::Sender<Arc<ProgressEvent>>,
}

impl ProgressChannel {
    pub fn new(job_id: JobId, config: ChannelConfig) -> Self {
        let (sender, _) = broadcast::channel(config.subscriber_buffer.max(1));
        Self {
            job_id,
            log_capacity: config.log_capacity.max(2),
            log: Mutex::new(ChannelLog {
                events: VecDeque::new(),
                next_seq: 0,
                latest: None,
                terminal: None,
            }),
            sender,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    fn lock(&self) -> MutexGuard<'_, ChannelLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `event` to the log and notify subscribers.
    ///
    /// Assigns the event's sequence number and job id. Fails once a terminal
    /// event has been published; the terminal event is always the last one.
    pub fn publish(&self, mut event: ProgressEvent) -> Result<Arc<ProgressEvent>, PublishError> {
        let mut log = self.lock();
        if log.terminal.is_some() {
            return Err(PublishError(self.job_id));
        }

        event.job_id = self.job_id;
        event.seq = log.next_seq;
        log.next_seq += 1;
        let event = Arc::new(event);

        log.events.push_back(Arc::clone(&event));
        if log.events.len() > self.log_capacity {
            let oldest_progress = log
                .events
                .iter()
                .position(|e| e.kind == EventKind::Progress);
            match oldest_progress {
                Some(i) => {
                    log.events.remove(i);
                }
                None => {
                    log.events.pop_front();
                }
            }
        }
        log.latest = Some(Arc::clone(&event));
        if event.is_terminal() {
            log.terminal = Some(Arc::clone(&event));
        }

        // Sent under the lock so subscribe() sees a consistent cut between
        // the replayed snapshot and the live feed. Zero receivers is fine.
        let _ = self.sender.send(Arc::clone(&event));
        Ok(event)
    }

    /// Subscribe starting from the latest known event.
    ///
    /// The subscription first yields the latest event (if any), then every
    /// event published afterwards, and ends after the terminal event. On a
    /// finished job it yields the terminal event and ends immediately.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let log = self.lock();
        let replay: VecDeque<_> = log.latest.iter().cloned().collect();
        let receiver = self.sender.subscribe();
        drop(log);
        Subscription::new(Arc::clone(self), replay, receiver)
    }

    /// Subscribe replaying every retained event with `seq > after`.
    ///
    /// Used by reconnecting stream clients that remember the last event they
    /// saw. If nothing newer is retained, behaves like [`subscribe`](Self::subscribe).
    pub fn subscribe_after(self: &Arc<Self>, after: u64) -> Subscription {
        let log = self.lock();
        let mut replay: VecDeque<_> = log
            .events
            .iter()
            .filter(|e| e.seq > after)
            .cloned()
            .collect();
        if replay.is_empty() {
            if let Some(latest) = log.latest.as_ref().filter(|e| e.seq > after || e.is_terminal()) {
                replay.push_back(Arc::clone(latest));
            }
        }
        let receiver = self.sender.subscribe();
        drop(log);
        Subscription::new(Arc::clone(self), replay, receiver)
    }

    /// Subscribe replaying the whole retained log.
    ///
    /// Used right after a job is created, so the caller sees `starting`
    /// even if the executor picked the job up first.
    pub fn subscribe_from_start(self: &Arc<Self>) -> Subscription {
        let log = self.lock();
        let replay: VecDeque<_> = log.events.iter().cloned().collect();
        let receiver = self.sender.subscribe();
        drop(log);
        Subscription::new(Arc::clone(self), replay, receiver)
    }

    /// Retained events with `seq > after` (all retained events for `None`).
    pub fn events_since(&self, after: Option<u64>) -> Vec<Arc<ProgressEvent>> {
        let log = self.lock();
        log.events
            .iter()
            .filter(|e| after.map_or(true, |after| e.seq > after))
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<Arc<ProgressEvent>> {
        self.lock().latest.clone()
    }

    pub fn terminal(&self) -> Option<Arc<ProgressEvent>> {
        self.lock().terminal.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminal.is_some()
    }

    /// Number of events published so far (not just retained).
    pub fn published_count(&self) -> u64 {
        self.lock().next_seq
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for ProgressChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressChannel")
            .field("job_id", &self.job_id)
            .field("published", &self.published_count())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

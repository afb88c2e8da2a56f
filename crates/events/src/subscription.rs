//! One subscriber's view of a [`ProgressChannel`].

use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::channel::ProgressChannel;
use crate::event::ProgressEvent;

/// Lazy, ordered sequence of a job's progress events.
///
/// Yields the replayed events captured at subscribe time, then live events,
/// and ends after the terminal event. Events are never yielded twice or out
/// of order. When the subscriber falls behind the publisher it skips
/// intermediate events but still receives the terminal one exactly once.
pub struct Subscription {
    channel: Arc<ProgressChannel>,
    replay: VecDeque<Arc<ProgressEvent>>,
    receiver: broadcast::Receiver<Arc<ProgressEvent>>,
    last_seq: Option<u64>,
    missed: u64,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(
        channel: Arc<ProgressChannel>,
        replay: VecDeque<Arc<ProgressEvent>>,
        receiver: broadcast::Receiver<Arc<ProgressEvent>>,
    ) -> Self {
        Self {
            channel,
            replay,
            receiver,
            last_seq: None,
            missed: 0,
            finished: false,
        }
    }

    /// Next event, or `None` once the terminal event has been yielded.
    pub async fn next(&mut self) -> Option<Arc<ProgressEvent>> {
        if self.finished {
            return None;
        }

        while let Some(event) = self.replay.pop_front() {
            if let Some(event) = self.accept(event) {
                return Some(event);
            }
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if let Some(event) = self.accept(event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    tracing::debug!(
                        job_id = %self.channel.job_id(),
                        skipped,
                        "Progress subscriber lagged; skipping ahead",
                    );
                }
                Err(RecvError::Closed) => {
                    let terminal = self.channel.terminal();
                    self.finished = true;
                    return terminal.filter(|t| self.last_seq.map_or(true, |seen| t.seq > seen));
                }
            }
        }
    }

    /// Filter out anything already yielded and track the terminal event.
    fn accept(&mut self, event: Arc<ProgressEvent>) -> Option<Arc<ProgressEvent>> {
        if self.last_seq.is_some_and(|seen| event.seq <= seen) {
            return None;
        }
        self.last_seq = Some(event.seq);
        if event.is_terminal() {
            self.finished = true;
        }
        Some(event)
    }

    /// Number of events this subscriber skipped because it fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    pub fn channel(&self) -> &Arc<ProgressChannel> {
        &self.channel
    }

    /// Convert into a `Stream` of events.
    pub fn into_stream(self) -> impl Stream<Item = Arc<ProgressEvent>> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("job_id", &self.channel.job_id())
            .field("last_seq", &self.last_seq)
            .field("missed", &self.missed)
            .field("finished", &self.finished)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use magetool_core::job::{JobOutcome, JobStatus};
    use magetool_core::types::JobId;

    use crate::channel::ChannelConfig;
    use crate::event::EventKind;

    use super::*;

    fn done(job_id: JobId) -> ProgressEvent {
        ProgressEvent::completed(
            job_id,
            JobOutcome {
                status: JobStatus::Completed,
                files: Vec::new(),
                error: None,
            },
        )
    }

    async fn drain(sub: &mut Subscription) -> Vec<Arc<ProgressEvent>> {
        let mut out = Vec::new();
        while let Some(e) = sub.next().await {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn mid_job_subscriber_sees_current_state_first() {
        let ch = Arc::new(ProgressChannel::new(JobId::new(), ChannelConfig::default()));
        ch.publish(ProgressEvent::starting(ch.job_id(), "go")).unwrap();
        ch.publish(ProgressEvent::progress(ch.job_id(), 40.0, "")).unwrap();

        let mut sub = ch.subscribe();
        ch.publish(ProgressEvent::progress(ch.job_id(), 70.0, "")).unwrap();
        ch.publish(done(ch.job_id())).unwrap();

        let percents: Vec<_> = drain(&mut sub).await.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![Some(40.0), Some(70.0), Some(100.0)]);
    }

    #[tokio::test]
    async fn slow_subscriber_still_receives_terminal_exactly_once() {
        let ch = Arc::new(ProgressChannel::new(
            JobId::new(),
            ChannelConfig {
                log_capacity: 256,
                subscriber_buffer: 4,
            },
        ));
        let sub = ch.subscribe();

        ch.publish(ProgressEvent::starting(ch.job_id(), "go")).unwrap();
        for p in 1..100 {
            ch.publish(ProgressEvent::progress(ch.job_id(), p as f64, "")).unwrap();
        }
        ch.publish(done(ch.job_id())).unwrap();

        let events: Vec<_> = sub.into_stream().collect().await;
        let terminals = events.iter().filter(|e| e.is_terminal()).count();

        assert_eq!(terminals, 1);
        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Completed));
        assert!(events.len() < 101);
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn subscriber_waits_for_live_events() {
        let ch = Arc::new(ProgressChannel::new(JobId::new(), ChannelConfig::default()));
        let mut sub = ch.subscribe();

        let publisher = {
            let ch = Arc::clone(&ch);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ch.publish(ProgressEvent::starting(ch.job_id(), "go")).unwrap();
                ch.publish(done(ch.job_id())).unwrap();
            })
        };

        assert_eq!(sub.next().await.map(|e| e.kind), Some(EventKind::Starting));
        assert_eq!(sub.next().await.map(|e| e.kind), Some(EventKind::Completed));
        assert!(sub.next().await.is_none());
        publisher.await.unwrap();
    }
}

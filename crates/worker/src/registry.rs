//! Process-wide job registry.
//!
//! The registry is the single source of truth for which jobs exist. Each
//! job lives in an [`Arc<JobEntry>`] shared between the registry map, the
//! executor task running it, and any HTTP handler reading it. The map
//! itself sits behind a `tokio::sync::RwLock`; per-job state sits behind a
//! short-lived `std::sync::Mutex` that is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use magetool_core::batch::{validate_batch_size, ANONYMOUS_CLIENT};
use magetool_core::error::CoreError;
use magetool_core::job::{JobOutcome, JobSnapshot, JobState, SubTaskInput};
use magetool_core::job_events::{EVENT_JOB_CREATED, EVENT_JOB_RETIRED};
use magetool_core::types::{ClientId, JobId, Timestamp};
use magetool_events::{ChannelConfig, EventBus, LifecycleEvent, ProgressChannel, Subscription};
use magetool_pipeline::Operation;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Default time a finished job stays queryable.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Default number of non-terminal jobs one client may own.
pub const DEFAULT_MAX_ACTIVE_PER_CLIENT: usize = 1;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a terminal job is kept before [`JobRegistry::sweep_retired`]
    /// removes it.
    pub retention: Duration,
    /// Non-terminal jobs allowed per client. `0` disables the limit.
    /// Callers without a client id share no identity, so the anonymous
    /// client is never limited.
    pub max_active_per_client: usize,
    pub channel: ChannelConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            max_active_per_client: DEFAULT_MAX_ACTIVE_PER_CLIENT,
            channel: ChannelConfig::default(),
        }
    }
}

/// Request to create a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub client_id: ClientId,
    pub operation: Operation,
    /// Route the job was submitted on, e.g. `images/convert`.
    pub route: String,
    pub inputs: Vec<SubTaskInput>,
}

// ---------------------------------------------------------------------------
// JobEntry
// ---------------------------------------------------------------------------

/// One registered job.
pub struct JobEntry {
    pub id: JobId,
    pub client_id: ClientId,
    pub operation: Operation,
    pub route: String,
    pub created_at: Timestamp,
    state: Mutex<JobState>,
    channel: Arc<ProgressChannel>,
    cancel: CancellationToken,
}

impl JobEntry {
    pub(crate) fn new(new: NewJob, channel_config: ChannelConfig) -> Self {
        let id = JobId::new();
        Self {
            id,
            client_id: new.client_id,
            operation: new.operation,
            route: new.route,
            created_at: Utc::now(),
            state: Mutex::new(JobState::new(new.inputs)),
            channel: Arc::new(ProgressChannel::new(id, channel_config)),
            cancel: CancellationToken::new(),
        }
    }

    /// Lock the job state. A poisoned lock is recovered: every mutation
    /// goes through [`JobState`] methods that keep it consistent.
    pub fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channel(&self) -> &Arc<ProgressChannel> {
        &self.channel
    }

    /// Token checked by the executor between SubTasks.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().status().is_terminal()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        JobSnapshot {
            id: self.id,
            client_id: self.client_id.clone(),
            operation: self.route.clone(),
            status: state.status(),
            progress: state.progress(),
            subtasks: state.subtasks().to_vec(),
            error: state.error().map(str::to_string),
            created_at: self.created_at,
            started_at: state.started_at(),
            ended_at: state.ended_at(),
        }
    }

    /// Result summary, once the job is terminal.
    pub fn outcome(&self) -> Option<JobOutcome> {
        let state = self.state();
        state
            .status()
            .is_terminal()
            .then(|| JobOutcome::from_state(&state))
    }
}

impl std::fmt::Debug for JobEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEntry")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("route", &self.route)
            .field("status", &self.state().status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Receiving half of the hand-off from the registry to the executor.
#[derive(Debug)]
pub struct JobQueue {
    rx: mpsc::UnboundedReceiver<Arc<JobEntry>>,
}

impl JobQueue {
    pub async fn recv(&mut self) -> Option<Arc<JobEntry>> {
        self.rx.recv().await
    }

    /// Stop accepting jobs and return everything still queued.
    pub fn close_and_drain(&mut self) -> Vec<Arc<JobEntry>> {
        self.rx.close();
        let mut pending = Vec::new();
        while let Ok(entry) = self.rx.try_recv() {
            pending.push(entry);
        }
        pending
    }
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

pub struct JobRegistry {
    config: RegistryConfig,
    jobs: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    queue: mpsc::UnboundedSender<Arc<JobEntry>>,
    event_bus: Arc<EventBus>,
}

impl JobRegistry {
    /// Create the registry and the queue the executor consumes.
    pub fn new(config: RegistryConfig, event_bus: Arc<EventBus>) -> (Arc<Self>, JobQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            config,
            jobs: RwLock::new(HashMap::new()),
            queue: tx,
            event_bus,
        });
        (registry, JobQueue { rx })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Validate, register and enqueue a job. Returns without waiting for
    /// execution to start.
    pub async fn create_job(&self, new: NewJob) -> Result<JobId, CoreError> {
        validate_batch_size(new.inputs.len())?;

        let mut jobs = self.jobs.write().await;

        let limit = self.config.max_active_per_client;
        if limit > 0 && new.client_id != ANONYMOUS_CLIENT {
            let active = jobs
                .values()
                .filter(|j| j.client_id == new.client_id && !j.is_terminal())
                .count();
            if active >= limit {
                return Err(CoreError::Conflict(format!(
                    "Client already has {active} active job(s); wait for them to finish"
                )));
            }
        }

        let entry = Arc::new(JobEntry::new(new, self.config.channel));
        let id = entry.id;
        let subtasks = entry.state().subtasks().len();

        self.queue
            .send(Arc::clone(&entry))
            .map_err(|_| CoreError::Internal("Job executor is not running".to_string()))?;
        jobs.insert(id, Arc::clone(&entry));
        drop(jobs);

        tracing::info!(
            job_id = %id,
            client_id = %entry.client_id,
            operation = %entry.operation,
            subtasks,
            "Job created",
        );
        self.event_bus.publish(
            LifecycleEvent::new(EVENT_JOB_CREATED, id, entry.client_id.clone()).with_payload(
                serde_json::json!({ "operation": entry.route, "subtasks": subtasks }),
            ),
        );

        Ok(id)
    }

    pub async fn get_entry(&self, id: JobId) -> Result<Arc<JobEntry>, CoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("Job", id))
    }

    pub async fn get_job(&self, id: JobId) -> Result<JobSnapshot, CoreError> {
        Ok(self.get_entry(id).await?.snapshot())
    }

    /// Subscribe to a job's progress. A job that already finished yields
    /// its terminal event straight away.
    pub async fn subscribe(&self, id: JobId) -> Result<Subscription, CoreError> {
        Ok(self.get_entry(id).await?.channel().subscribe())
    }

    /// Jobs owned by `client_id`, newest first.
    pub async fn list_for_client(&self, client_id: &str) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.client_id == client_id)
            .map(|j| j.snapshot())
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Request cancellation. SubTasks already resolved keep their results;
    /// unstarted ones fail as cancelled. Only the owning client may cancel.
    pub async fn cancel(&self, id: JobId, client_id: &str) -> Result<JobSnapshot, CoreError> {
        let entry = self.get_entry(id).await?;
        if entry.client_id != client_id {
            return Err(CoreError::not_found("Job", id));
        }
        if !entry.is_terminal() {
            entry.cancel.cancel();
            tracing::info!(job_id = %id, client_id = %client_id, "Job cancellation requested");
        }
        Ok(entry.snapshot())
    }

    /// Remove a terminal job. Returns `false` if the job is unknown or
    /// still active.
    pub async fn retire(&self, id: JobId) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get(&id) else {
            return false;
        };
        if !entry.is_terminal() {
            return false;
        }
        let Some(entry) = jobs.remove(&id) else {
            return false;
        };
        drop(jobs);

        tracing::debug!(job_id = %id, "Job retired");
        self.event_bus
            .publish(LifecycleEvent::new(EVENT_JOB_RETIRED, id, entry.client_id.clone()));
        true
    }

    /// Retire every job whose terminal state is older than the retention
    /// window. Returns the number retired.
    pub async fn sweep_retired(&self, now: Timestamp) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let expired: Vec<JobId> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| {
                let state = j.state();
                state.status().is_terminal()
                    && state.ended_at().is_some_and(|ended| now - ended > retention)
            })
            .map(|j| j.id)
            .collect();

        let mut retired = 0;
        for id in expired {
            if self.retire(id).await {
                retired += 1;
            }
        }
        retired
    }

    /// Number of registered jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Number of non-terminal jobs.
    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| !j.is_terminal())
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

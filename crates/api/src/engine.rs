//! Wiring of the job engine: artifact store, registry, and executor.
//!
//! Shared by the binary and the integration tests so both run the exact
//! same engine.

use std::sync::Arc;
use std::time::Duration;

use magetool_events::EventBus;
use magetool_pipeline::Transform;
use magetool_store::{ArtifactStore, LocalArtifactStore, StoreError};
use magetool_worker::{JobExecutor, JobRegistry};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// A running job engine.
pub struct Engine {
    pub registry: Arc<JobRegistry>,
    pub store: Arc<LocalArtifactStore>,
    pub event_bus: Arc<EventBus>,
    cancel: CancellationToken,
    executor: JoinHandle<()>,
}

impl Engine {
    /// Open the store, create the registry, and spawn the executor loop.
    pub async fn start(
        config: &ServerConfig,
        transform: Arc<dyn Transform>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(LocalArtifactStore::open(config.store_config()).await?);
        tracing::info!(root = %config.storage_dir.display(), "Artifact store opened");

        let event_bus = Arc::new(EventBus::default());
        let (registry, queue) = JobRegistry::new(config.registry_config(), Arc::clone(&event_bus));

        let executor = Arc::new(JobExecutor::new(
            config.executor_config(),
            Arc::clone(&store) as Arc<dyn ArtifactStore>,
            transform,
            Arc::clone(&event_bus),
        ));
        let cancel = CancellationToken::new();
        let executor = tokio::spawn(executor.run(queue, cancel.clone()));

        Ok(Self {
            registry,
            store,
            event_bus,
            cancel,
            executor,
        })
    }

    /// Stop dispatching and wait up to `drain` for in-flight jobs.
    ///
    /// Returns `false` if the drain window elapsed first.
    pub async fn shutdown(mut self, drain: Duration) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(drain, &mut self.executor).await {
            Ok(_) => {
                tracing::info!("Job engine drained");
                true
            }
            Err(_) => {
                let active = self.registry.active_count().await;
                tracing::warn!(
                    active,
                    drain_secs = drain.as_secs(),
                    "Job engine did not drain in time, abandoning in-flight jobs"
                );
                self.executor.abort();
                false
            }
        }
    }
}

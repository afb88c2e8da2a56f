//! Periodic removal of retired jobs from the registry.
//!
//! Finished jobs stay queryable for the configured retention window; after
//! that the registry marks them retired and this task drops them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use magetool_worker::JobRegistry;
use tokio_util::sync::CancellationToken;

/// Run the job retention loop until `cancel` is triggered.
pub async fn run(registry: Arc<JobRegistry>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Job retention task started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                let removed = registry.sweep_retired(Utc::now()).await;
                if removed > 0 {
                    let remaining = registry.len().await;
                    tracing::info!(removed, remaining, "Job retention: dropped retired jobs");
                } else {
                    tracing::debug!("Job retention: nothing to drop");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use magetool_core::job::SubTaskInput;
    use magetool_events::EventBus;
    use magetool_pipeline::Operation;
    use magetool_worker::{NewJob, RegistryConfig};

    use super::*;

    #[tokio::test]
    async fn drops_jobs_past_retention() {
        let config = RegistryConfig {
            retention: Duration::ZERO,
            max_active_per_client: 0,
            ..RegistryConfig::default()
        };
        let (registry, _queue) = JobRegistry::new(config, Arc::new(EventBus::default()));
        let id = registry
            .create_job(NewJob {
                client_id: "c1".to_string(),
                operation: Operation::MediaDownload { audio_only: false },
                route: "videos/youtube-download".to_string(),
                inputs: vec![SubTaskInput::Url {
                    url: "https://cdn.example.com/a.mp4".to_string(),
                }],
            })
            .await
            .unwrap();
        let entry = registry.get_entry(id).await.unwrap();
        entry.state().fail_fatal("boom", Utc::now()).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&registry), Duration::from_millis(5), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let (registry, _queue) = JobRegistry::new(RegistryConfig::default(), Arc::new(EventBus::default()));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(registry, Duration::from_millis(10), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task should stop")
            .unwrap();
    }
}

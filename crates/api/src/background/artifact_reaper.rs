//! Periodic eviction of expired artifacts.
//!
//! Reads already refuse expired artifacts; this task reclaims their disk
//! space and quota.

use std::sync::Arc;
use std::time::Duration;

use magetool_store::ArtifactStore;
use tokio_util::sync::CancellationToken;

/// Run the artifact reaper loop until `cancel` is triggered.
pub async fn run(store: Arc<dyn ArtifactStore>, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Artifact reaper started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Artifact reaper stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = store.sweep_expired().await;
                if evicted > 0 {
                    tracing::info!(
                        evicted,
                        available_bytes = store.available_bytes(),
                        "Artifact reaper: evicted expired artifacts"
                    );
                } else {
                    tracing::debug!("Artifact reaper: nothing expired");
                }
            }
        }
    }
}

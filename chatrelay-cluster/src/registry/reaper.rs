use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ConnectionRegistry;

/// Periodically removes expired registry entries.
///
/// Reaping is storage hygiene only: expired entries are already invisible
/// to `list_live`, so a slow or failing reaper never affects delivery.
pub struct RegistryReaper {
    registry: Arc<dyn ConnectionRegistry>,
    interval: Duration,
}

impl RegistryReaper {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Registry reaper stopped");
                    return;
                }
                _ = interval.tick() => {
                    match self.registry.reap_expired().await {
                        Ok(0) => {}
                        Ok(reaped) => debug!(reaped, "Reaped expired connections"),
                        Err(e) => warn!(error = %e, "Failed to reap expired connections"),
                    }
                }
            }
        }
    }
}

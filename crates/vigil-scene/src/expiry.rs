//! Background expiration monitor for scene deployments.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::scheduler::SceneScheduler;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically retires deployments whose policy end has passed.
pub struct ExpirationMonitor {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirationMonitor {
    pub fn spawn(scheduler: Arc<SceneScheduler>) -> Self {
        Self::spawn_with_interval(scheduler, SWEEP_INTERVAL)
    }

    pub fn spawn_with_interval(scheduler: Arc<SceneScheduler>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let retired = scheduler.expire_pass(Utc::now()).await;
                        if !retired.is_empty() {
                            info!(count = retired.len(), "Expiration sweep retired scenes");
                        }
                    }
                }
            }
            info!("Expiration monitor stopped");
        });
        info!(interval_secs = interval.as_secs(), "Expiration monitor started");
        Self { stop_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

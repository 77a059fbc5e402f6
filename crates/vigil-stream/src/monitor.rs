//! Background health monitor for running sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::manager::StreamManager;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically sweeps the manager for stalled or stuck sessions.
pub struct HealthMonitor {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn(manager: Arc<StreamManager>) -> Self {
        Self::spawn_with_interval(manager, SWEEP_INTERVAL)
    }

    pub fn spawn_with_interval(manager: Arc<StreamManager>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let flagged = manager.health_sweep(Utc::now());
                        if !flagged.is_empty() {
                            debug!(count = flagged.len(), "Health sweep flagged sessions");
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        });
        info!(interval_secs = interval.as_secs(), "Health monitor started");
        Self { stop_tx, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

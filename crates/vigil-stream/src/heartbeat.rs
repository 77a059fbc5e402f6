//! Per-device keepalive reporting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::HeartbeatError;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Consecutive send failures before the advisory error is logged.
const FAILURE_ALERT_THRESHOLD: u32 = 3;
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One keepalive report for a device.
#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Carries heartbeats to the upstream platform.
#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
    async fn send(&self, beat: &Heartbeat) -> Result<(), HeartbeatError>;
}

/// HTTP POST transport.
pub struct HttpHeartbeatTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpHeartbeatTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl HeartbeatTransport for HttpHeartbeatTransport {
    async fn send(&self, beat: &Heartbeat) -> Result<(), HeartbeatError> {
        let response = self.client.post(&self.endpoint).json(beat).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(HeartbeatError::Status(response.status()))
        }
    }
}

/// Snapshot of heartbeat counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeartbeatStats {
    pub active_devices: usize,
    pub sent: u64,
    pub failed: u64,
}

struct DeviceTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// One keepalive task per device id.
///
/// Failures are advisory: after three consecutive send failures for a
/// device an error is logged, and nothing else happens. Sessions keep
/// running whether or not the platform hears from us.
pub struct HeartbeatManager {
    transport: Arc<dyn HeartbeatTransport>,
    interval: Duration,
    tasks: Mutex<HashMap<String, DeviceTask>>,
    sent: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl HeartbeatManager {
    pub fn new(transport: Arc<dyn HeartbeatTransport>) -> Self {
        Self::with_interval(transport, HEARTBEAT_INTERVAL)
    }

    pub fn with_interval(transport: Arc<dyn HeartbeatTransport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
            tasks: Mutex::new(HashMap::new()),
            sent: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the keepalive task for a device. Idempotent.
    pub fn start(&self, device_id: &str) {
        let mut tasks = self.tasks.lock().expect("heartbeat tasks lock poisoned");
        if tasks.contains_key(device_id) {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let transport = Arc::clone(&self.transport);
        let interval = self.interval;
        let sent = Arc::clone(&self.sent);
        let failed = Arc::clone(&self.failed);
        let device = device_id.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut consecutive_failures: u32 = 0;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                let beat = Heartbeat {
                    device_id: device.clone(),
                    timestamp: Utc::now(),
                };
                match transport.send(&beat).await {
                    Ok(()) => {
                        consecutive_failures = 0;
                        sent.fetch_add(1, Ordering::Relaxed);
                        debug!(device_id = %device, "Heartbeat sent");
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        failed.fetch_add(1, Ordering::Relaxed);
                        if consecutive_failures == FAILURE_ALERT_THRESHOLD {
                            error!(
                                device_id = %device,
                                consecutive_failures,
                                error = %err,
                                "Heartbeat delivery failing repeatedly"
                            );
                        } else {
                            warn!(
                                device_id = %device,
                                consecutive_failures,
                                error = %err,
                                "Heartbeat failed"
                            );
                        }
                    }
                }
            }
            debug!(device_id = %device, "Heartbeat task exited");
        });

        info!(device_id, interval_secs = self.interval.as_secs(), "Heartbeat started");
        tasks.insert(device_id.to_string(), DeviceTask { stop_tx, handle });
    }

    /// Stop a device's keepalive task, waiting briefly for it to exit.
    /// Stopping an unknown device is a no-op.
    pub async fn stop(&self, device_id: &str) {
        let task = {
            self.tasks
                .lock()
                .expect("heartbeat tasks lock poisoned")
                .remove(device_id)
        };
        let Some(task) = task else {
            return;
        };

        let _ = task.stop_tx.send(true);
        let mut handle = task.handle;
        if tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut handle)
            .await
            .is_err()
        {
            warn!(device_id, "Heartbeat task did not exit in time, aborting");
            handle.abort();
        }
        info!(device_id, "Heartbeat stopped");
    }

    /// Stop every keepalive task. Used during shutdown.
    pub async fn stop_all(&self) {
        let devices: Vec<String> = {
            self.tasks
                .lock()
                .expect("heartbeat tasks lock poisoned")
                .keys()
                .cloned()
                .collect()
        };
        for device_id in devices {
            self.stop(&device_id).await;
        }
    }

    pub fn active_devices(&self) -> Vec<String> {
        self.tasks
            .lock()
            .expect("heartbeat tasks lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            active_devices: self
                .tasks
                .lock()
                .expect("heartbeat tasks lock poisoned")
                .len(),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

//! Delivery channel backends: log, HTTP callback, message bus.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use vigil_models::NotificationChannel;

use crate::dispatcher::{NotificationTask, NotifyChannel};
use crate::error::{NotifyError, NotifyResult};

/// Consecutive failures before a callback endpoint is disabled.
const CIRCUIT_OPEN_THRESHOLD: u32 = 10;
/// Every Nth consecutive failure below the threshold is logged.
const FAILURE_LOG_EVERY: u32 = 3;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Formats the alarm into the structured log. Never fails.
pub struct LogChannel;

#[async_trait]
impl NotifyChannel for LogChannel {
    fn kind(&self) -> NotificationChannel {
        NotificationChannel::Log
    }

    async fn deliver(&self, task: &NotificationTask) -> NotifyResult<()> {
        warn!(
            session_id = %task.event.session_id,
            rule = %task.rule_name,
            class = %task.event.class_name,
            severity = task.event.severity.as_str(),
            confidence = task.event.confidence,
            consecutive = task.event.consecutive_count,
            media_ref = task.event.media_ref.as_deref().unwrap_or("-"),
            "ALARM"
        );
        Ok(())
    }
}

/// POSTs the alarm to the session's callback endpoint.
///
/// Endpoints that fail [`CIRCUIT_OPEN_THRESHOLD`] times in a row are
/// disabled until [`CallbackChannel::reset_target`] re-enables them; a
/// single success also resets the failure run.
pub struct CallbackChannel {
    client: reqwest::Client,
    failures: Mutex<HashMap<String, u32>>,
}

impl Default for CallbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackChannel {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(CALLBACK_TIMEOUT)
                .build()
                .unwrap_or_default(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn is_open(&self, target: &str) -> bool {
        self.failures
            .lock()
            .expect("callback breaker lock poisoned")
            .get(target)
            .is_some_and(|&n| n >= CIRCUIT_OPEN_THRESHOLD)
    }

    fn record_success(&self, target: &str) {
        self.failures
            .lock()
            .expect("callback breaker lock poisoned")
            .remove(target);
    }

    fn record_failure(&self, target: &str) {
        let mut failures = self.failures.lock().expect("callback breaker lock poisoned");
        let count = failures.entry(target.to_string()).or_insert(0);
        *count += 1;
        if *count >= CIRCUIT_OPEN_THRESHOLD {
            error!(
                target,
                consecutive_failures = *count,
                "Callback endpoint disabled after repeated failures"
            );
        } else if *count % FAILURE_LOG_EVERY == 0 {
            warn!(target, consecutive_failures = *count, "Callback endpoint failing");
        }
    }

    /// Re-enable a disabled endpoint.
    pub fn reset_target(&self, target: &str) {
        if self
            .failures
            .lock()
            .expect("callback breaker lock poisoned")
            .remove(target)
            .is_some()
        {
            info!(target, "Callback endpoint re-enabled");
        }
    }

    /// Endpoints currently disabled by the breaker.
    pub fn disabled_targets(&self) -> Vec<String> {
        self.failures
            .lock()
            .expect("callback breaker lock poisoned")
            .iter()
            .filter(|(_, &n)| n >= CIRCUIT_OPEN_THRESHOLD)
            .map(|(t, _)| t.clone())
            .collect()
    }
}

#[async_trait]
impl NotifyChannel for CallbackChannel {
    fn kind(&self) -> NotificationChannel {
        NotificationChannel::Callback
    }

    async fn deliver(&self, task: &NotificationTask) -> NotifyResult<()> {
        let Some(target) = task.notify.as_ref().and_then(|n| n.callback_url.as_deref()) else {
            debug!(
                session_id = %task.event.session_id,
                rule_id = %task.rule_id,
                "No callback endpoint for session, skipping"
            );
            return Ok(());
        };
        if self.is_open(target) {
            return Err(NotifyError::CircuitOpen(target.to_string()));
        }

        let body = serde_json::json!({
            "session_id": task.event.session_id,
            "rule_id": task.rule_id,
            "rule_name": task.rule_name,
            "class_name": task.event.class_name,
            "severity": task.event.severity.as_str(),
            "confidence": task.event.confidence,
            "timestamp": task.event.timestamp.to_rfc3339(),
            "bbox": task.event.bbox,
            "consecutive_count": task.event.consecutive_count,
            "media_ref": task.event.media_ref,
        });

        let response = match self.client.post(target).json(&body).send().await {
            Ok(response) => response,
            Err(err) => {
                self.record_failure(target);
                return Err(err.into());
            }
        };
        if response.status().is_success() {
            self.record_success(target);
            Ok(())
        } else {
            self.record_failure(target);
            Err(NotifyError::status(target, response.status().as_u16()))
        }
    }
}

/// Bus event for an alarm. Field names are part of the downstream
/// contract and must stay stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub scene: String,
    #[serde(rename = "deviceGbCode")]
    pub device_gb_code: String,
    #[serde(rename = "alarmTime")]
    pub alarm_time: String,
    pub pic: Option<String>,
    pub record: Option<String>,
}

/// Publishes alarm payloads to the message bus.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, payload: &AlarmPayload) -> NotifyResult<()>;
}

/// Bus publisher backed by a Redis stream.
pub struct RedisBusPublisher {
    manager: redis::aio::ConnectionManager,
    stream_key: String,
}

impl RedisBusPublisher {
    pub async fn connect(url: &str, stream_key: impl Into<String>) -> NotifyResult<Self> {
        let client = redis::Client::open(url).map_err(NotifyError::Bus)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(NotifyError::Bus)?;
        Ok(Self {
            manager,
            stream_key: stream_key.into(),
        })
    }
}

#[async_trait]
impl BusPublisher for RedisBusPublisher {
    async fn publish(&self, payload: &AlarmPayload) -> NotifyResult<()> {
        let json = serde_json::to_string(payload)?;
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("payload")
            .arg(json)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// Builds the bus payload from an alarm and hands it to the publisher.
pub struct BusChannel {
    publisher: Arc<dyn BusPublisher>,
}

impl BusChannel {
    pub fn new(publisher: Arc<dyn BusPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl NotifyChannel for BusChannel {
    fn kind(&self) -> NotificationChannel {
        NotificationChannel::Bus
    }

    async fn deliver(&self, task: &NotificationTask) -> NotifyResult<()> {
        let notify = task.notify.as_ref();
        let payload = AlarmPayload {
            scene: notify
                .and_then(|n| n.scene.clone())
                .unwrap_or_else(|| task.rule_name.clone()),
            device_gb_code: notify
                .and_then(|n| n.device_id.clone())
                .unwrap_or_else(|| task.event.session_id.clone()),
            alarm_time: task.event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            pic: task.event.media_ref.clone(),
            record: None,
        };
        self.publisher.publish(&payload).await
    }
}

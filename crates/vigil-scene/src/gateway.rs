//! Device platform gateway.
//!
//! The platform knows which stream URL serves each device; the
//! scheduler asks it once per device during deploy.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::error::{GatewayError, GatewayResult};

/// Resolves a device id to a stream source locator. Failures are
/// per-device; a failed device never aborts the deploy.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    async fn resolve_source(&self, device_id: &str) -> GatewayResult<String>;
}

#[derive(Debug, Deserialize)]
struct StreamUrlResponse {
    url: String,
}

/// HTTP gateway with bounded retries per lookup.
pub struct HttpDeviceGateway {
    client: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpDeviceGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retries(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn fetch(&self, device_id: &str) -> GatewayResult<String> {
        let url = format!(
            "{}/devices/{}/stream",
            self.base_url.trim_end_matches('/'),
            device_id
        );
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::Status {
                device_id: device_id.to_string(),
                status: response.status(),
            });
        }
        let body: StreamUrlResponse = response.json().await?;
        if body.url.trim().is_empty() {
            return Err(GatewayError::MissingUrl {
                device_id: device_id.to_string(),
            });
        }
        Ok(body.url)
    }
}

#[async_trait]
impl DeviceGateway for HttpDeviceGateway {
    async fn resolve_source(&self, device_id: &str) -> GatewayResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch(device_id).await {
                Ok(url) => return Ok(url),
                Err(err) => {
                    warn!(
                        device_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Stream url lookup failed"
                    );
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

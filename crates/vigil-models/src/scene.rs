//! Scene deployments: a time-windowed binding of one detection policy
//! to a set of devices.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::TimePolicy;

/// A device to deploy a scene onto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Externally assigned device id
    pub device_id: String,
    /// Detection region string, parsed by [`crate::region::DetectionRegion`];
    /// empty means no region filtering for this device
    #[serde(default)]
    pub area: String,
}

/// A device successfully bound to a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub device_id: String,
    pub session_id: String,
    pub source: String,
}

/// Request to deploy a scene, as received from the management side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Externally assigned scene id; at most one live deployment per id
    pub scene_id: String,
    /// Algorithm code resolved to a model id
    pub algorithm: String,
    pub devices: Vec<DeviceSpec>,
    pub policy: TimePolicy,
}

/// A live scene deployment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDeployment {
    pub scene_id: String,
    pub algorithm: String,
    pub model_id: String,
    /// device id -> session id
    pub sessions: HashMap<String, String>,
    pub policy: TimePolicy,
    pub deployed_at: DateTime<Utc>,
    /// Absolute expiry derived from the policy, if any
    pub expires_at: Option<DateTime<Utc>>,
}

impl SceneDeployment {
    /// Whether the deployment has passed its absolute end time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(end) if now >= end)
    }
}

/// A device that could not be deployed, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDevice {
    pub device_id: String,
    pub reason: String,
}

/// Result of a deploy operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub scene_id: String,
    pub deployed: Vec<DeviceBinding>,
    pub failed: Vec<FailedDevice>,
}

impl DeployOutcome {
    /// A deployment counts as successful if at least one device came up.
    pub fn is_success(&self) -> bool {
        !self.deployed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_expiry() {
        let deployment = SceneDeployment {
            scene_id: "fire-watch".to_string(),
            algorithm: "flame".to_string(),
            model_id: "flame-v2".to_string(),
            sessions: HashMap::new(),
            policy: TimePolicy::Absolute {
                start: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap(),
            },
            deployed_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            expires_at: Some(Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap()),
        };

        assert!(!deployment.is_expired(Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap()));
        assert!(deployment.is_expired(Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()));
    }
}

//! Agent configuration.

use std::collections::HashMap;
use std::time::Duration;

use vigil_detect::PoolMode;

/// Agent configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifier carried in heartbeats
    pub instance_id: String,
    /// Maximum registered sessions
    pub max_sessions: usize,
    /// Detector sharing mode
    pub pool_mode: PoolMode,
    /// Redis connection for the bus channel; bus disabled when unset
    pub redis_url: Option<String>,
    /// Stream key for bus alarm events
    pub bus_stream: String,
    /// Heartbeat endpoint; heartbeats disabled when unset
    pub heartbeat_endpoint: Option<String>,
    pub heartbeat_interval: Duration,
    /// Device platform base url for scene deploys; deploys from file are
    /// skipped when unset
    pub platform_url: Option<String>,
    /// JSON file with alarm rules to load at startup
    pub rules_path: Option<String>,
    /// JSON file with scene deploy requests to apply at startup
    pub scenes_path: Option<String>,
    /// algorithm code -> model id
    pub algorithms: HashMap<String, String>,
    /// Fixed ambient reading for ambient-gated policies
    pub ambient_reading: f64,
    /// Directory for detection snapshots; persistence disabled when unset
    pub results_dir: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("vigil-{}", uuid::Uuid::new_v4()),
            max_sessions: 32,
            pool_mode: PoolMode::Shared,
            redis_url: None,
            bus_stream: "vigil:alarms".to_string(),
            heartbeat_endpoint: None,
            heartbeat_interval: Duration::from_secs(10),
            platform_url: None,
            rules_path: None,
            scenes_path: None,
            algorithms: HashMap::new(),
            ambient_reading: 0.0,
            results_dir: None,
        }
    }
}

impl AgentConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            instance_id: std::env::var("AGENT_INSTANCE_ID").unwrap_or(defaults.instance_id),
            max_sessions: std::env::var("AGENT_MAX_SESSIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_sessions),
            pool_mode: match std::env::var("AGENT_POOL_MODE").as_deref() {
                Ok("dedicated") => PoolMode::Dedicated,
                _ => PoolMode::Shared,
            },
            redis_url: std::env::var("REDIS_URL").ok(),
            bus_stream: std::env::var("AGENT_BUS_STREAM").unwrap_or(defaults.bus_stream),
            heartbeat_endpoint: std::env::var("AGENT_HEARTBEAT_URL").ok(),
            heartbeat_interval: Duration::from_secs(
                std::env::var("AGENT_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            platform_url: std::env::var("AGENT_PLATFORM_URL").ok(),
            rules_path: std::env::var("AGENT_RULES_PATH").ok(),
            scenes_path: std::env::var("AGENT_SCENES_PATH").ok(),
            algorithms: std::env::var("AGENT_ALGORITHMS")
                .map(|s| parse_algorithms(&s))
                .unwrap_or(defaults.algorithms),
            ambient_reading: std::env::var("AGENT_AMBIENT_READING")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.ambient_reading),
            results_dir: std::env::var("AGENT_RESULTS_DIR").ok(),
        }
    }
}

/// Parse "flame=flame-v2,smoke=smoke-v1" into a code -> model map.
fn parse_algorithms(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (code, model) = pair.split_once('=')?;
            let (code, model) = (code.trim(), model.trim());
            if code.is_empty() || model.is_empty() {
                None
            } else {
                Some((code.to_string(), model.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_algorithms() {
        let map = parse_algorithms("flame=flame-v2, smoke=smoke-v1");
        assert_eq!(map.len(), 2);
        assert_eq!(map["flame"], "flame-v2");
        assert_eq!(map["smoke"], "smoke-v1");

        assert!(parse_algorithms("").is_empty());
        assert!(parse_algorithms("broken").is_empty());
    }
}

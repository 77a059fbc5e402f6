//! Scene scheduler: deploys scenes onto device groups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use vigil_models::{
    DeployOutcome, DeployRequest, DeviceBinding, FailedDevice, NotifyTarget, SceneDeployment,
    StreamConfig,
};
use vigil_stream::{HeartbeatManager, StreamManager};

use crate::error::{SceneError, SceneResult};
use crate::gate::PolicyGate;
use crate::gateway::DeviceGateway;

/// Turns deploy requests into running sessions, one per device.
///
/// At most one live deployment exists per scene id; redeploying a scene
/// tears the previous deployment down first, so retried requests are
/// idempotent. Device failures are collected into the outcome rather
/// than aborting the deploy.
pub struct SceneScheduler {
    manager: Arc<StreamManager>,
    gateway: Arc<dyn DeviceGateway>,
    gate: Arc<PolicyGate>,
    /// algorithm code -> model id
    algorithms: HashMap<String, String>,
    heartbeats: Option<Arc<HeartbeatManager>>,
    deployments: Mutex<HashMap<String, SceneDeployment>>,
}

impl SceneScheduler {
    pub fn new(
        manager: Arc<StreamManager>,
        gateway: Arc<dyn DeviceGateway>,
        gate: Arc<PolicyGate>,
        algorithms: HashMap<String, String>,
    ) -> Self {
        Self {
            manager,
            gateway,
            gate,
            algorithms,
            heartbeats: None,
            deployments: Mutex::new(HashMap::new()),
        }
    }

    /// Report per-device keepalives while a device's session is deployed.
    pub fn with_heartbeats(mut self, heartbeats: Arc<HeartbeatManager>) -> Self {
        self.heartbeats = Some(heartbeats);
        self
    }

    fn session_id(scene_id: &str, device_id: &str) -> String {
        format!("{scene_id}-{device_id}")
    }

    /// Deploy a scene: resolve every device to a source, then register
    /// and start one session per device. Per-device failures land in
    /// the outcome's failed list.
    pub async fn deploy(&self, request: DeployRequest) -> SceneResult<DeployOutcome> {
        let model_id = self
            .algorithms
            .get(&request.algorithm)
            .cloned()
            .ok_or_else(|| SceneError::UnknownAlgorithm(request.algorithm.clone()))?;
        if request.devices.is_empty() {
            return Err(SceneError::NoDevices(request.scene_id));
        }

        // Redeploy: tear the previous deployment down first.
        let existing = {
            self.deployments
                .lock()
                .expect("deployments lock poisoned")
                .remove(&request.scene_id)
        };
        if let Some(existing) = existing {
            info!(scene_id = %request.scene_id, "Redeploying scene, stopping previous sessions");
            self.teardown_sessions(&existing).await;
        }

        let mut deployed = Vec::new();
        let mut failed = Vec::new();
        let mut sessions = HashMap::new();

        for device in &request.devices {
            let source = match self.gateway.resolve_source(&device.device_id).await {
                Ok(source) => source,
                Err(err) => {
                    warn!(
                        scene_id = %request.scene_id,
                        device_id = %device.device_id,
                        error = %err,
                        "Device has no usable stream source"
                    );
                    failed.push(FailedDevice {
                        device_id: device.device_id.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let session_id = Self::session_id(&request.scene_id, &device.device_id);
            let mut config = StreamConfig::new(&session_id, &source, &model_id);
            if !device.area.trim().is_empty() {
                config.region = Some(device.area.clone());
            }
            config.time_policy = Some(request.policy.clone());
            config.notify = Some(NotifyTarget {
                callback_url: None,
                scene: Some(request.scene_id.clone()),
                device_id: Some(device.device_id.clone()),
            });

            // The gate must know the policy before the worker's first
            // iteration.
            self.gate.set(&session_id, request.policy.clone());
            let started = match self.manager.register(config) {
                Ok(()) => self.manager.start(&session_id).await,
                Err(err) => Err(err),
            };
            match started {
                Ok(()) => {
                    if let Some(hb) = &self.heartbeats {
                        hb.start(&device.device_id);
                    }
                    deployed.push(DeviceBinding {
                        device_id: device.device_id.clone(),
                        session_id: session_id.clone(),
                        source,
                    });
                    sessions.insert(device.device_id.clone(), session_id);
                }
                Err(err) => {
                    self.gate.clear(&session_id);
                    let _ = self.manager.unregister(&session_id).await;
                    failed.push(FailedDevice {
                        device_id: device.device_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        if !deployed.is_empty() {
            let deployment = SceneDeployment {
                scene_id: request.scene_id.clone(),
                algorithm: request.algorithm.clone(),
                model_id,
                sessions,
                expires_at: request.policy.expires_at(),
                policy: request.policy,
                deployed_at: Utc::now(),
            };
            self.deployments
                .lock()
                .expect("deployments lock poisoned")
                .insert(request.scene_id.clone(), deployment);
        }

        info!(
            scene_id = %request.scene_id,
            deployed = deployed.len(),
            failed = failed.len(),
            "Scene deploy finished"
        );
        Ok(DeployOutcome {
            scene_id: request.scene_id,
            deployed,
            failed,
        })
    }

    /// Stop and forget a deployment. Returns the retired record.
    pub async fn stop_deployment(&self, scene_id: &str) -> SceneResult<SceneDeployment> {
        let deployment = self
            .deployments
            .lock()
            .expect("deployments lock poisoned")
            .remove(scene_id)
            .ok_or_else(|| SceneError::NotFound(scene_id.to_string()))?;
        self.teardown_sessions(&deployment).await;
        info!(scene_id, "Scene deployment stopped");
        Ok(deployment)
    }

    async fn teardown_sessions(&self, deployment: &SceneDeployment) {
        for (device_id, session_id) in &deployment.sessions {
            if let Some(hb) = &self.heartbeats {
                hb.stop(device_id).await;
            }
            self.gate.clear(session_id);
            if let Err(err) = self.manager.unregister(session_id).await {
                warn!(
                    scene_id = %deployment.scene_id,
                    session_id = %session_id,
                    error = %err,
                    "Session teardown failed"
                );
            }
        }
    }

    pub fn deployment(&self, scene_id: &str) -> SceneResult<SceneDeployment> {
        self.deployments
            .lock()
            .expect("deployments lock poisoned")
            .get(scene_id)
            .cloned()
            .ok_or_else(|| SceneError::NotFound(scene_id.to_string()))
    }

    pub fn scene_ids(&self) -> Vec<String> {
        self.deployments
            .lock()
            .expect("deployments lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// One expiration pass: retire every deployment whose policy end
    /// has passed. Returns the retired scene ids.
    pub async fn expire_pass(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = {
            let deployments = self.deployments.lock().expect("deployments lock poisoned");
            deployments
                .values()
                .filter(|d| d.is_expired(now))
                .map(|d| d.scene_id.clone())
                .collect()
        };

        let mut retired = Vec::new();
        for scene_id in expired {
            match self.stop_deployment(&scene_id).await {
                Ok(_) => {
                    info!(scene_id = %scene_id, "Expired scene retired");
                    retired.push(scene_id);
                }
                Err(err) => {
                    // Raced with a concurrent stop; nothing left to do.
                    warn!(scene_id = %scene_id, error = %err, "Expiration teardown skipped");
                }
            }
        }
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    use vigil_alarm::{AlarmEngine, AlarmSink, NotificationTask};
    use vigil_detect::{
        DetectResult, Detector, FixedAmbient, InferOptions, ModelLoader, ModelPool, PoolMode,
    };
    use vigil_models::{DeviceSpec, Frame, TimeOfDayRange, TimePolicy};
    use vigil_stream::{FrameSource, ManagerConfig, SourceConnector, SourceError};

    struct NullSink;
    impl AlarmSink for NullSink {
        fn submit(&self, _task: NotificationTask) {}
    }

    struct StubDetector;
    impl Detector for StubDetector {
        fn infer(&mut self, _frame: &Frame, _opts: &InferOptions) -> DetectResult<Vec<vigil_models::Detection>> {
            Ok(Vec::new())
        }
        fn class_names(&self) -> StdHashMap<u32, String> {
            StdHashMap::new()
        }
    }

    struct StubLoader;
    impl ModelLoader for StubLoader {
        fn load(&self, _model_id: &str) -> DetectResult<Box<dyn Detector>> {
            Ok(Box::new(StubDetector))
        }
    }

    /// Source that never yields; workers sit in the read until stopped.
    struct IdleSource;

    #[async_trait]
    impl FrameSource for IdleSource {
        async fn next_frame(&mut self) -> Result<Frame, SourceError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct IdleConnector;

    #[async_trait]
    impl SourceConnector for IdleConnector {
        async fn connect(&self, _source: &str) -> Result<Box<dyn FrameSource>, SourceError> {
            Ok(Box::new(IdleSource))
        }
    }

    struct MapGateway {
        sources: StdHashMap<String, String>,
    }

    #[async_trait]
    impl DeviceGateway for MapGateway {
        async fn resolve_source(&self, device_id: &str) -> crate::error::GatewayResult<String> {
            self.sources.get(device_id).cloned().ok_or_else(|| {
                crate::error::GatewayError::UnknownDevice {
                    device_id: device_id.to_string(),
                }
            })
        }
    }

    fn scheduler() -> SceneScheduler {
        let gate = Arc::new(PolicyGate::new());
        let manager = Arc::new(StreamManager::new(
            ManagerConfig {
                stop_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            Arc::new(ModelPool::new(PoolMode::Shared, Arc::new(StubLoader))),
            Arc::new(IdleConnector),
            Arc::new(AlarmEngine::new(Arc::new(NullSink))),
            gate.clone(),
            Arc::new(FixedAmbient(0.0)),
        ));
        let gateway = Arc::new(MapGateway {
            sources: StdHashMap::from([
                ("gb-001".to_string(), "rtsp://cam/gb-001".to_string()),
                ("gb-002".to_string(), "rtsp://cam/gb-002".to_string()),
            ]),
        });
        SceneScheduler::new(
            manager,
            gateway,
            gate,
            StdHashMap::from([("flame".to_string(), "flame-v2".to_string())]),
        )
    }

    fn all_day() -> TimePolicy {
        TimePolicy::Daily {
            window: TimeOfDayRange::new(
                chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            ),
        }
    }

    fn request(scene: &str, devices: &[&str], policy: TimePolicy) -> DeployRequest {
        DeployRequest {
            scene_id: scene.to_string(),
            algorithm: "flame".to_string(),
            devices: devices
                .iter()
                .map(|id| DeviceSpec {
                    device_id: id.to_string(),
                    area: String::new(),
                })
                .collect(),
            policy,
        }
    }

    #[tokio::test]
    async fn test_deploy_reports_per_device_outcome() {
        let scheduler = scheduler();
        let outcome = scheduler
            .deploy(request("fire-watch", &["gb-001", "gb-404"], all_day()))
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.deployed.len(), 1);
        assert_eq!(outcome.deployed[0].session_id, "fire-watch-gb-001");
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].device_id, "gb-404");

        let deployment = scheduler.deployment("fire-watch").unwrap();
        assert_eq!(deployment.model_id, "flame-v2");
        assert_eq!(deployment.sessions.len(), 1);
        assert!(scheduler.gate.policy("fire-watch-gb-001").is_some());
    }

    #[tokio::test]
    async fn test_device_area_reaches_session_config() {
        let scheduler = scheduler();
        let mut req = request("fire-watch", &["gb-001", "gb-002"], all_day());
        req.devices[0].area = "(0,0),(100,0),(100,100),(0,100)".to_string();
        scheduler.deploy(req).await.unwrap();

        let with_area = scheduler
            .manager
            .session_config("fire-watch-gb-001")
            .unwrap();
        assert_eq!(
            with_area.region.as_deref(),
            Some("(0,0),(100,0),(100,100),(0,100)")
        );
        // A blank area means no region filtering.
        let without = scheduler
            .manager
            .session_config("fire-watch-gb-002")
            .unwrap();
        assert!(without.region.is_none());
    }

    #[tokio::test]
    async fn test_deploy_rejects_bad_requests() {
        let scheduler = scheduler();

        let mut bad_algo = request("s1", &["gb-001"], all_day());
        bad_algo.algorithm = "unknown".to_string();
        assert!(matches!(
            scheduler.deploy(bad_algo).await,
            Err(SceneError::UnknownAlgorithm(_))
        ));

        assert!(matches!(
            scheduler.deploy(request("s1", &[], all_day())).await,
            Err(SceneError::NoDevices(_))
        ));
    }

    #[tokio::test]
    async fn test_redeploy_is_idempotent() {
        let scheduler = scheduler();
        scheduler
            .deploy(request("fire-watch", &["gb-001", "gb-002"], all_day()))
            .await
            .unwrap();
        let first = scheduler.deployment("fire-watch").unwrap();

        // Second deploy of the same scene replaces the first cleanly.
        let outcome = scheduler
            .deploy(request("fire-watch", &["gb-001"], all_day()))
            .await
            .unwrap();
        assert_eq!(outcome.deployed.len(), 1);
        assert!(outcome.failed.is_empty());

        let second = scheduler.deployment("fire-watch").unwrap();
        assert_eq!(second.sessions.len(), 1);
        assert!(second.deployed_at >= first.deployed_at);
        // The device dropped by the redeploy is fully torn down.
        assert!(scheduler.gate.policy("fire-watch-gb-002").is_none());
        assert!(scheduler
            .manager
            .status("fire-watch-gb-002")
            .is_err());
    }

    #[tokio::test]
    async fn test_stop_deployment_tears_sessions_down() {
        let scheduler = scheduler();
        scheduler
            .deploy(request("fire-watch", &["gb-001"], all_day()))
            .await
            .unwrap();

        scheduler.stop_deployment("fire-watch").await.unwrap();
        assert!(scheduler.manager.status("fire-watch-gb-001").is_err());
        assert!(scheduler.gate.policy("fire-watch-gb-001").is_none());
        assert!(matches!(
            scheduler.stop_deployment("fire-watch").await,
            Err(SceneError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deploy_manages_device_heartbeats() {
        struct NullTransport;

        #[async_trait]
        impl vigil_stream::HeartbeatTransport for NullTransport {
            async fn send(
                &self,
                _beat: &vigil_stream::Heartbeat,
            ) -> Result<(), vigil_stream::HeartbeatError> {
                Ok(())
            }
        }

        let heartbeats = Arc::new(HeartbeatManager::with_interval(
            Arc::new(NullTransport),
            Duration::from_secs(60),
        ));
        let scheduler = scheduler().with_heartbeats(heartbeats.clone());

        scheduler
            .deploy(request("fire-watch", &["gb-001", "gb-404"], all_day()))
            .await
            .unwrap();
        // Only the device that actually deployed gets a keepalive.
        assert_eq!(heartbeats.active_devices(), vec!["gb-001".to_string()]);

        scheduler.stop_deployment("fire-watch").await.unwrap();
        assert!(heartbeats.active_devices().is_empty());
    }

    #[tokio::test]
    async fn test_expire_pass_retires_ended_deployments() {
        let scheduler = scheduler();
        let past = TimePolicy::Absolute {
            start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
        };
        scheduler
            .deploy(request("old-scene", &["gb-001"], past))
            .await
            .unwrap();
        scheduler
            .deploy(request("fire-watch", &["gb-002"], all_day()))
            .await
            .unwrap();

        let retired = scheduler.expire_pass(Utc::now()).await;
        assert_eq!(retired, vec!["old-scene".to_string()]);
        assert!(scheduler.deployment("old-scene").is_err());
        // Perpetual policies never expire.
        assert!(scheduler.deployment("fire-watch").is_ok());
    }
}

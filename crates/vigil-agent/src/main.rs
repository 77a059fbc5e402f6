//! Video analysis agent binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vigil_alarm::{
    AlarmEngine, BusChannel, CallbackChannel, LogChannel, NotificationDispatcher, NotifyChannel,
    RedisBusPublisher,
};
use vigil_detect::{FixedAmbient, ModelPool};
use vigil_models::{AlarmRule, DeployRequest};
use vigil_scene::{ExpirationMonitor, HttpDeviceGateway, PolicyGate, SceneScheduler};
use vigil_stream::{
    HealthMonitor, HeartbeatManager, HttpHeartbeatTransport, ManagerConfig, StreamManager,
};

mod backend;
mod config;

use config::AgentConfig;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vigil=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vigil-agent");

    let config = AgentConfig::from_env();
    info!("Agent config: {:?}", config);

    // Notification channels
    let mut channels: Vec<Arc<dyn NotifyChannel>> =
        vec![Arc::new(LogChannel), Arc::new(CallbackChannel::new())];
    if let Some(redis_url) = &config.redis_url {
        match RedisBusPublisher::connect(redis_url, &config.bus_stream).await {
            Ok(publisher) => {
                channels.push(Arc::new(BusChannel::new(Arc::new(publisher))));
            }
            Err(e) => {
                error!("Failed to connect bus publisher: {}", e);
                std::process::exit(1);
            }
        }
    }
    let dispatcher = Arc::new(NotificationDispatcher::new(channels));
    let engine = Arc::new(AlarmEngine::new(dispatcher.clone()));

    if let Some(path) = &config.rules_path {
        match load_rules(path) {
            Ok(rules) => {
                for rule in rules {
                    if let Err(e) = engine.add_rule(rule) {
                        warn!("Skipping alarm rule: {}", e);
                    }
                }
            }
            Err(e) => {
                error!("Failed to load alarm rules: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    // Stream manager and its collaborators
    let pool = Arc::new(ModelPool::new(config.pool_mode, Arc::new(backend::NullLoader)));
    let gate = Arc::new(PolicyGate::new());
    let mut manager = StreamManager::new(
        ManagerConfig {
            max_sessions: config.max_sessions,
            ..Default::default()
        },
        pool,
        Arc::new(backend::SyntheticConnector::default()),
        engine.clone(),
        gate.clone(),
        Arc::new(FixedAmbient(config.ambient_reading)),
    );
    if let Some(dir) = &config.results_dir {
        manager = manager.with_artifact_store(Arc::new(backend::FsArtifactStore::new(dir)));
    }
    let manager = Arc::new(manager);

    let health = HealthMonitor::spawn(manager.clone());
    let heartbeats = config.heartbeat_endpoint.as_ref().map(|endpoint| {
        Arc::new(HeartbeatManager::with_interval(
            Arc::new(HttpHeartbeatTransport::new(endpoint)),
            config.heartbeat_interval,
        ))
    });

    // Scene scheduling, when a device platform is configured
    let scheduler = config.platform_url.as_ref().map(|url| {
        let mut scheduler = SceneScheduler::new(
            manager.clone(),
            Arc::new(HttpDeviceGateway::new(url)),
            gate.clone(),
            config.algorithms.clone(),
        );
        if let Some(heartbeats) = &heartbeats {
            scheduler = scheduler.with_heartbeats(heartbeats.clone());
        }
        Arc::new(scheduler)
    });
    let expiry = scheduler.clone().map(ExpirationMonitor::spawn);

    if let (Some(scheduler), Some(path)) = (&scheduler, &config.scenes_path) {
        match load_scenes(path) {
            Ok(requests) => {
                for request in requests {
                    let scene_id = request.scene_id.clone();
                    match scheduler.deploy(request).await {
                        Ok(outcome) => info!(
                            scene_id = %scene_id,
                            deployed = outcome.deployed.len(),
                            failed = outcome.failed.len(),
                            "Scene deployed at startup"
                        ),
                        Err(e) => warn!(scene_id = %scene_id, "Scene deploy failed: {}", e),
                    }
                }
            }
            Err(e) => {
                error!("Failed to load scene deployments: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    info!(instance_id = %config.instance_id, "Agent running");
    tokio::signal::ctrl_c().await.ok();
    info!("Received shutdown signal");

    if let Some(scheduler) = &scheduler {
        for scene_id in scheduler.scene_ids() {
            if let Err(e) = scheduler.stop_deployment(&scene_id).await {
                warn!(scene_id = %scene_id, "Scene teardown failed: {}", e);
            }
        }
    }
    manager.stop_all().await;
    if let Some(expiry) = expiry {
        expiry.stop().await;
    }
    health.stop().await;
    if let Some(heartbeats) = &heartbeats {
        heartbeats.stop_all().await;
    }
    dispatcher.shutdown().await;

    info!("Agent shutdown complete");
}

fn load_rules(path: &str) -> anyhow::Result<Vec<AlarmRule>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading alarm rules from {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing alarm rules from {path}"))
}

fn load_scenes(path: &str) -> anyhow::Result<Vec<DeployRequest>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading scene deployments from {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing scene deployments from {path}"))
}

//! Stream manager: session admission, lifecycle and status queries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vigil_alarm::AlarmEngine;
use vigil_detect::{build_post_processor, AmbientProvider, ModelPool};
use vigil_models::{SessionState, SessionStatus, StreamConfig};

use crate::artifact::ArtifactStore;
use crate::error::{StreamError, StreamResult};
use crate::source::SourceConnector;
use crate::worker::{SessionWorker, SharedState};

/// Decides whether a session may process frames right now. Implemented
/// by the scene scheduler; sessions without a policy are always
/// permitted.
pub trait SessionGate: Send + Sync {
    fn is_permitted(&self, session_id: &str) -> bool;
}

/// Gate that never blocks.
pub struct AlwaysPermitted;

impl SessionGate for AlwaysPermitted {
    fn is_permitted(&self, _session_id: &str) -> bool {
        true
    }
}

/// Tunables for admission and worker recovery.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum registered sessions
    pub max_sessions: usize,
    /// Source connect attempts before giving up
    pub reconnect_attempts: u32,
    /// Delay between connect attempts
    pub reconnect_delay: Duration,
    /// How long Stop waits for the worker before abandoning it
    pub stop_timeout: Duration,
    /// Sessions idle longer than this while Active are marked stalled
    pub stall_after: Duration,
    /// Sessions stuck Reconnecting longer than this are marked failed
    pub reconnect_deadline: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            stall_after: Duration::from_secs(60),
            reconnect_deadline: Duration::from_secs(120),
        }
    }
}

/// Aggregate counters across all sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamManagerStats {
    pub total_sessions: usize,
    pub running_sessions: usize,
    pub total_frames: u64,
    pub total_detections: u64,
    pub total_errors: u64,
}

struct WorkerRuntime {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct SessionEntry {
    config: StreamConfig,
    state: SharedState,
    runtime: Option<WorkerRuntime>,
}

/// Owns every registered session.
///
/// Registration validates and admits; Start loads the model, then
/// spawns the worker; Stop signals it and waits bounded. All mutation
/// goes through the internal map lock, which is never held across an
/// await.
pub struct StreamManager {
    config: ManagerConfig,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    pool: Arc<ModelPool>,
    connector: Arc<dyn SourceConnector>,
    engine: Arc<AlarmEngine>,
    gate: Arc<dyn SessionGate>,
    ambient: Arc<dyn AmbientProvider>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl StreamManager {
    pub fn new(
        config: ManagerConfig,
        pool: Arc<ModelPool>,
        connector: Arc<dyn SourceConnector>,
        engine: Arc<AlarmEngine>,
        gate: Arc<dyn SessionGate>,
        ambient: Arc<dyn AmbientProvider>,
    ) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            pool,
            connector,
            engine,
            gate,
            ambient,
            artifacts: None,
        }
    }

    /// Persist detection snapshots through the given store.
    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    /// Admit a new session. Synchronous; no model is loaded and no
    /// source is opened until Start.
    pub fn register(&self, config: StreamConfig) -> StreamResult<()> {
        config.validate().map_err(StreamError::Config)?;

        let mut sessions = self.sessions.lock().expect("session map lock poisoned");
        if sessions.contains_key(&config.id) {
            return Err(StreamError::DuplicateId(config.id));
        }
        if sessions.len() >= self.config.max_sessions {
            return Err(StreamError::CapacityExceeded {
                limit: self.config.max_sessions,
            });
        }

        info!(session_id = %config.id, source = %config.source, model_id = %config.model_id, "Session registered");
        sessions.insert(
            config.id.clone(),
            SessionEntry {
                config,
                state: Arc::new(Mutex::new(SessionState::new())),
                runtime: None,
            },
        );
        Ok(())
    }

    /// Start a registered session: load the model, then hand the
    /// session to a worker task. Fails synchronously when the model
    /// cannot load; source connectivity is the worker's problem.
    pub async fn start(&self, session_id: &str) -> StreamResult<()> {
        let (config, state) = {
            let mut sessions = self.sessions.lock().expect("session map lock poisoned");
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| StreamError::NotFound(session_id.to_string()))?;
            // A worker that exited on its own (e.g. reconnect attempts
            // exhausted) leaves a finished handle behind; reap it so the
            // session can be started again without an explicit Stop.
            if entry
                .runtime
                .as_ref()
                .is_some_and(|r| r.handle.is_finished())
            {
                entry.runtime = None;
            }
            {
                let mut state = entry.state.lock().expect("session state lock poisoned");
                if entry.runtime.is_some() || state.status.is_running() {
                    return Err(StreamError::AlreadyRunning(session_id.to_string()));
                }
                // Reserve the slot before the lock drops so a
                // concurrent Start observes it.
                state.status = SessionStatus::Connecting;
                state.last_active_at = Utc::now();
            }
            (entry.config.clone(), Arc::clone(&entry.state))
        };

        let detector = match self.pool.detector(&config.model_id, session_id).await {
            Ok(detector) => detector,
            Err(err) => {
                state
                    .lock()
                    .expect("session state lock poisoned")
                    .record_error(SessionStatus::Error, err.to_string());
                return Err(err.into());
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = SessionWorker {
            post: build_post_processor(&config.post_policy, Arc::clone(&self.ambient)),
            config,
            state: Arc::clone(&state),
            detector,
            connector: Arc::clone(&self.connector),
            engine: Arc::clone(&self.engine),
            gate: Arc::clone(&self.gate),
            pool: Arc::clone(&self.pool),
            artifacts: self.artifacts.clone(),
            stop: stop_rx,
            reconnect_attempts: self.config.reconnect_attempts,
            reconnect_delay: self.config.reconnect_delay,
        };
        let handle = tokio::spawn(worker.run());

        let mut sessions = self.sessions.lock().expect("session map lock poisoned");
        match sessions.get_mut(session_id) {
            Some(entry) => {
                entry.runtime = Some(WorkerRuntime { stop_tx, handle });
                Ok(())
            }
            None => {
                // Unregistered between the admission check and the
                // spawn; tear the worker back down.
                let _ = stop_tx.send(true);
                Err(StreamError::NotFound(session_id.to_string()))
            }
        }
    }

    /// Stop a session's worker, waiting bounded for it to exit.
    /// Idempotent: stopping a session that is not running succeeds.
    pub async fn stop(&self, session_id: &str) -> StreamResult<()> {
        let runtime = {
            let mut sessions = self.sessions.lock().expect("session map lock poisoned");
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| StreamError::NotFound(session_id.to_string()))?;
            entry.runtime.take()
        };
        let Some(runtime) = runtime else {
            return Ok(());
        };

        let _ = runtime.stop_tx.send(true);
        let mut handle = runtime.handle;
        if tokio::time::timeout(self.config.stop_timeout, &mut handle)
            .await
            .is_err()
        {
            warn!(session_id, "Worker did not exit in time, aborting");
            handle.abort();
            // The worker's own cleanup may not have run.
            if let Some(entry) = self
                .sessions
                .lock()
                .expect("session map lock poisoned")
                .get(session_id)
            {
                self.pool.release_session(&entry.config.model_id, session_id);
                let mut state = entry.state.lock().expect("session state lock poisoned");
                state.reset_counters();
                if state.status != SessionStatus::Error {
                    state.status = SessionStatus::Inactive;
                }
            }
            self.engine.clear_session(session_id);
        }
        info!(session_id, "Session stopped");
        Ok(())
    }

    /// Stop (if running) and remove a session.
    pub async fn unregister(&self, session_id: &str) -> StreamResult<()> {
        self.stop(session_id).await?;
        self.sessions
            .lock()
            .expect("session map lock poisoned")
            .remove(session_id);
        self.engine.clear_session(session_id);
        info!(session_id, "Session unregistered");
        Ok(())
    }

    /// Stop every running session. Used during shutdown.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = {
            let sessions = self.sessions.lock().expect("session map lock poisoned");
            sessions
                .iter()
                .filter(|(_, e)| e.runtime.is_some())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            if let Err(err) = self.stop(&id).await {
                warn!(session_id = %id, error = %err, "Stop during shutdown failed");
            }
        }
    }

    /// Point-in-time state of one session.
    pub fn status(&self, session_id: &str) -> StreamResult<SessionState> {
        let sessions = self.sessions.lock().expect("session map lock poisoned");
        let entry = sessions
            .get(session_id)
            .ok_or_else(|| StreamError::NotFound(session_id.to_string()))?;
        let state = entry
            .state
            .lock()
            .expect("session state lock poisoned")
            .clone();
        Ok(state)
    }

    pub fn session_config(&self, session_id: &str) -> StreamResult<StreamConfig> {
        let sessions = self.sessions.lock().expect("session map lock poisoned");
        sessions
            .get(session_id)
            .map(|e| e.config.clone())
            .ok_or_else(|| StreamError::NotFound(session_id.to_string()))
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .expect("session map lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Aggregate counters across sessions.
    pub fn stats(&self) -> StreamManagerStats {
        let sessions = self.sessions.lock().expect("session map lock poisoned");
        let mut stats = StreamManagerStats {
            total_sessions: sessions.len(),
            ..Default::default()
        };
        for entry in sessions.values() {
            let state = entry.state.lock().expect("session state lock poisoned");
            if state.status.is_running() {
                stats.running_sessions += 1;
            }
            stats.total_frames += state.frame_count;
            stats.total_detections += state.detection_count;
            stats.total_errors += state.error_count;
        }
        stats
    }

    /// One health pass: flag Active sessions that stopped producing and
    /// Reconnecting sessions that never came back. Returns the ids
    /// flagged this pass.
    pub fn health_sweep(&self, now: DateTime<Utc>) -> Vec<String> {
        let sessions = self.sessions.lock().expect("session map lock poisoned");
        let mut flagged = Vec::new();
        for (id, entry) in sessions.iter() {
            let mut state = entry.state.lock().expect("session state lock poisoned");
            let idle = state.idle_secs(now);
            match state.status {
                SessionStatus::Active if idle > self.config.stall_after.as_secs() as i64 => {
                    warn!(session_id = %id, idle_secs = idle, "Session stalled");
                    state.record_error(
                        SessionStatus::Error,
                        format!("stalled: no frames for {idle}s"),
                    );
                    flagged.push(id.clone());
                }
                SessionStatus::Reconnecting
                    if idle > self.config.reconnect_deadline.as_secs() as i64 =>
                {
                    warn!(session_id = %id, idle_secs = idle, "Reconnect deadline exceeded");
                    state.record_error(
                        SessionStatus::Error,
                        format!("reconnect deadline exceeded after {idle}s"),
                    );
                    flagged.push(id.clone());
                }
                _ => {}
            }
        }
        flagged
    }
}

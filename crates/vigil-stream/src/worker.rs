//! Per-session worker task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use vigil_alarm::AlarmEngine;
use vigil_detect::{DetectorHandle, InferOptions, ModelPool, PostProcessor};
use vigil_models::{
    ArtifactPath, DetectionRegion, DetectionResult, SessionState, SessionStatus, StreamConfig,
};

use crate::artifact::ArtifactStore;
use crate::manager::SessionGate;
use crate::source::{FrameSource, SourceConnector, SourceError};

/// Idle sleep while the session's time policy forbids processing.
const GATE_POLL: Duration = Duration::from_millis(500);
/// Frames between periodic progress log lines.
const LOG_EVERY_FRAMES: u64 = 10;

pub(crate) type SharedState = Arc<std::sync::Mutex<SessionState>>;

/// Owns one session's processing loop from start signal to exit.
///
/// The loop per iteration: honor the stop signal, honor the time-policy
/// gate, acquire a frame (reconnecting as needed), drop corrupt and
/// rate-limited frames, run inference, post-process, and feed the alarm
/// engine. All terminal paths release the source, the detector and the
/// per-session alarm state.
pub(crate) struct SessionWorker {
    pub config: StreamConfig,
    pub state: SharedState,
    pub detector: DetectorHandle,
    pub connector: Arc<dyn SourceConnector>,
    pub post: Arc<dyn PostProcessor>,
    pub engine: Arc<AlarmEngine>,
    pub gate: Arc<dyn SessionGate>,
    pub pool: Arc<ModelPool>,
    pub artifacts: Option<Arc<dyn ArtifactStore>>,
    pub stop: watch::Receiver<bool>,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl SessionWorker {
    pub(crate) async fn run(mut self) {
        let session_id = self.config.id.clone();
        let opts = InferOptions {
            confidence: self.config.confidence_threshold,
            iou: self.config.iou_threshold,
            image_size: self.config.image_size,
        };
        let min_interval = self.config.frame_interval();
        let region = self
            .config
            .region
            .as_deref()
            .map(DetectionRegion::parse)
            .unwrap_or_default();

        let mut source: Option<Box<dyn FrameSource>> = None;
        let mut frame_id: u64 = 0;
        let mut last_processed: Option<Instant> = None;

        info!(session_id = %session_id, source = %self.config.source, "Session worker started");

        loop {
            if *self.stop.borrow() {
                break;
            }

            if !self.gate.is_permitted(&session_id) {
                // Outside the permitted window: release the source so
                // the camera is free, and idle until it reopens.
                if let Some(mut s) = source.take() {
                    debug!(session_id = %session_id, "Time policy closed, releasing source");
                    s.close().await;
                }
                tokio::select! {
                    _ = self.stop.changed() => {}
                    _ = tokio::time::sleep(GATE_POLL) => {}
                }
                continue;
            }

            if source.is_none() {
                match self.connect_with_retry(&session_id).await {
                    Some(s) => source = Some(s),
                    None => break,
                }
            }
            let Some(src) = source.as_mut() else { break };

            let read = tokio::select! {
                _ = self.stop.changed() => None,
                frame = src.next_frame() => Some(frame),
            };
            let frame = match read {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(SourceError::Transient(msg))) => {
                    debug!(session_id = %session_id, error = %msg, "Transient read failure");
                    continue;
                }
                Some(Err(SourceError::ConnectionLost(msg))) => {
                    warn!(session_id = %session_id, error = %msg, "Source connection lost");
                    self.state
                        .lock()
                        .expect("session state lock poisoned")
                        .record_error(SessionStatus::Reconnecting, msg);
                    source = None;
                    continue;
                }
            };

            if frame.is_corrupt() {
                debug!(
                    session_id = %session_id,
                    width = frame.width,
                    height = frame.height,
                    "Corrupt frame skipped"
                );
                continue;
            }

            frame_id += 1;

            // Rate limit: frames arriving faster than the configured
            // interval are discarded, not queued.
            if let Some(min) = min_interval {
                if last_processed.is_some_and(|t| t.elapsed() < min) {
                    continue;
                }
            }
            let prev_processed = last_processed;
            last_processed = Some(Instant::now());

            let started = Instant::now();
            let mut detections = match self.detector.infer(&frame, &opts).await {
                Ok(detections) => detections,
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "Inference failed, frame skipped");
                    let mut state = self.state.lock().expect("session state lock poisoned");
                    state.error_count += 1;
                    state.last_error = Some(err.to_string());
                    continue;
                }
            };
            if !self.config.target_classes.is_empty() {
                detections.retain(|d| {
                    self.config
                        .target_classes
                        .iter()
                        .any(|c| c == &d.class_name)
                });
            }
            if !region.is_empty() {
                detections.retain(|d| region.admits(d));
            }

            let mut result = DetectionResult::new(&session_id, frame_id, detections);
            result.processing = started.elapsed();

            if !self.post.apply(&mut result) {
                self.state
                    .lock()
                    .expect("session state lock poisoned")
                    .record_frame(0, 0.0);
                continue;
            }

            if let Some(store) = &self.artifacts {
                if result.detection_count() > 0 {
                    let path = ArtifactPath::derive(&session_id, result.timestamp, frame_id);
                    match store.persist(&frame, &result, &path).await {
                        Ok(media_ref) => result.media_ref = Some(media_ref),
                        Err(err) => {
                            warn!(session_id = %session_id, error = %err, "Artifact persist failed");
                        }
                    }
                }
            }

            let detection_count = result.detection_count() as u64;
            self.engine.evaluate(&result, self.config.notify.as_ref());

            let frame_count = {
                let mut state = self.state.lock().expect("session state lock poisoned");
                state.record_frame(detection_count, result.processing.as_secs_f64());
                state.frame_count
            };

            if frame_count % LOG_EVERY_FRAMES == 0 {
                let interval_ms = prev_processed
                    .zip(last_processed)
                    .map(|(prev, last)| last.duration_since(prev).as_millis() as u64)
                    .unwrap_or(0);
                info!(
                    session_id = %session_id,
                    frames = frame_count,
                    detections = detection_count,
                    processing_ms = result.processing.as_millis() as u64,
                    interval_ms,
                    "Session progress"
                );
            }
        }

        if let Some(mut s) = source.take() {
            s.close().await;
        }
        self.pool
            .release_session(&self.config.model_id, &session_id);
        self.post.clear_session(&session_id);
        self.engine.clear_session(&session_id);
        {
            let mut state = self.state.lock().expect("session state lock poisoned");
            state.reset_counters();
            if state.status != SessionStatus::Error {
                state.status = SessionStatus::Inactive;
            }
        }
        info!(session_id = %session_id, "Session worker exited");
    }

    /// Open the source, retrying on a fixed delay. Returns None when
    /// the attempts are exhausted or a stop was signalled; exhaustion
    /// leaves the session in Error.
    async fn connect_with_retry(&mut self, session_id: &str) -> Option<Box<dyn FrameSource>> {
        for attempt in 1..=self.reconnect_attempts {
            if *self.stop.borrow() {
                return None;
            }
            match self.connector.connect(&self.config.source).await {
                Ok(source) => {
                    self.state
                        .lock()
                        .expect("session state lock poisoned")
                        .status = SessionStatus::Active;
                    info!(session_id, attempt, "Source connected");
                    return Some(source);
                }
                Err(err) => {
                    warn!(
                        session_id,
                        attempt,
                        max_attempts = self.reconnect_attempts,
                        error = %err,
                        "Source connect failed"
                    );
                    {
                        let mut state = self.state.lock().expect("session state lock poisoned");
                        state.record_error(SessionStatus::Reconnecting, err.to_string());
                    }
                    tokio::select! {
                        _ = self.stop.changed() => return None,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
        self.state
            .lock()
            .expect("session state lock poisoned")
            .record_error(SessionStatus::Error, "reconnect attempts exhausted");
        None
    }
}

//! Session status and runtime state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a managed session.
///
/// Transitions only along the edges enforced by the stream manager:
/// Inactive -> Connecting -> Active | Error; Active -> Error | Inactive;
/// Error -> Reconnecting -> Active | Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Registered but not running
    #[default]
    Inactive,
    /// Start requested, capture not yet open
    Connecting,
    /// Processing frames
    Active,
    /// Failed; recoverable errors move on to Reconnecting
    Error,
    /// Attempting to re-open the source
    Reconnecting,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Inactive => "inactive",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Active => "active",
            SessionStatus::Error => "error",
            SessionStatus::Reconnecting => "reconnecting",
        }
    }

    /// True while a worker task is expected to be running.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            SessionStatus::Connecting | SessionStatus::Active | SessionStatus::Reconnecting
        )
    }
}

/// Rolling performance counters for one session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionStatsSnapshot {
    pub average_fps: f64,
    pub average_processing_ms: f64,
    pub total_detections: u64,
}

/// Mutable runtime state of one session.
///
/// Mutated only by the owning worker and the manager's health monitor;
/// status queries read a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub frame_count: u64,
    pub detection_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub stats: SessionStatsSnapshot,
}

impl SessionState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            status: SessionStatus::Inactive,
            created_at: now,
            last_active_at: now,
            frame_count: 0,
            detection_count: 0,
            error_count: 0,
            last_error: None,
            stats: SessionStatsSnapshot::default(),
        }
    }

    /// Record a processed frame and fold its processing time into the
    /// rolling averages.
    pub fn record_frame(&mut self, detections: u64, processing_secs: f64) {
        self.frame_count += 1;
        self.detection_count += detections;
        self.last_active_at = Utc::now();

        self.stats.total_detections += detections;
        if processing_secs > 0.0 {
            let n = self.frame_count as f64;
            let prev = self.stats.average_processing_ms;
            self.stats.average_processing_ms =
                (prev * (n - 1.0) + processing_secs * 1000.0) / n;
            self.stats.average_fps = 1.0 / processing_secs;
        }
    }

    /// Record an error and transition to the given status.
    pub fn record_error(&mut self, status: SessionStatus, message: impl Into<String>) {
        self.status = status;
        self.error_count += 1;
        self.last_error = Some(message.into());
    }

    /// Reset the counters owned by the worker on terminal exit.
    pub fn reset_counters(&mut self) {
        self.frame_count = 0;
        self.detection_count = 0;
        self.stats = SessionStatsSnapshot::default();
    }

    /// Seconds since the last recorded activity.
    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_active_at).num_seconds()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

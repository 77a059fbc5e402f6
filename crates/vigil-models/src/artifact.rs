//! Deterministic naming for persisted per-detection artifacts.
//!
//! Persistence itself is handled by an external viewer-facing sink; the
//! engine only derives paths, so a media URL can be reconstructed from
//! (date, session id, timestamp, frame id) even when a disk write
//! failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deterministic artifact location for one detection event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPath {
    /// Relative directory holding the event's files
    pub dir: String,
}

impl ArtifactPath {
    /// Derive the artifact directory from the event coordinates.
    ///
    /// Layout: `results/{YYYY-MM-DD}/{session}/{HH-MM-SS-mmm}_frame_{n}`.
    pub fn derive(session_id: &str, timestamp: DateTime<Utc>, frame_id: u64) -> Self {
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H-%M-%S-%3f");
        Self {
            dir: format!("results/{date}/{session_id}/{time}_frame_{frame_id}"),
        }
    }

    /// Path of the detection summary file.
    pub fn info_path(&self) -> String {
        format!("{}/detection_info.json", self.dir)
    }

    /// Path of the annotated snapshot image.
    pub fn picture_path(&self) -> String {
        format!("{}/annotated.jpg", self.dir)
    }

    /// Publicly reachable picture URL under the given base.
    pub fn picture_url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.picture_path())
    }
}

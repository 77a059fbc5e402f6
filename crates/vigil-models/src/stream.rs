//! Stream registration configuration.

use serde::{Deserialize, Serialize};

use crate::policy::TimePolicy;

/// Post-processing policy selector stored on a stream config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PostPolicyId {
    /// No post-processing
    #[default]
    PassThrough,
    /// Synthesize a "missing" pseudo-detection when fewer than
    /// `min_count` detections of `class_name` are present
    MissingEquipment { class_name: String, min_count: usize },
    /// Continue processing only while the ambient reading meets the
    /// threshold
    AmbientGate { threshold: f64 },
}

/// Where alarm notifications for a session are delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NotifyTarget {
    /// HTTP callback endpoint for the callback channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Scene name carried in bus payloads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<String>,
    /// Device id carried in bus payloads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// Configuration for one video stream session.
///
/// Immutable after registration; owned by the stream manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Globally unique session id
    pub id: String,
    /// Source locator (RTSP/RTMP URL, file path, ...)
    pub source: String,
    /// Detection confidence threshold
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
    /// Non-max-suppression IoU threshold
    #[serde(default = "default_iou")]
    pub iou_threshold: f32,
    /// Maximum processed frames per second; 0 disables the limit
    #[serde(default = "default_fps")]
    pub fps_limit: f64,
    /// Model to run frames through
    pub model_id: String,
    /// Inference image size (square edge)
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    /// Only keep detections of these classes; empty keeps all
    #[serde(default)]
    pub target_classes: Vec<String>,
    /// Polygonal detection region string; detections centered outside
    /// are dropped. See [`crate::region::DetectionRegion`]
    #[serde(default)]
    pub region: Option<String>,
    /// Post-processing policy
    #[serde(default)]
    pub post_policy: PostPolicyId,
    /// Optional time-window gate
    #[serde(default)]
    pub time_policy: Option<TimePolicy>,
    /// Optional notification target
    #[serde(default)]
    pub notify: Option<NotifyTarget>,
}

fn default_confidence() -> f32 {
    0.25
}

fn default_iou() -> f32 {
    0.45
}

fn default_fps() -> f64 {
    1.0
}

fn default_image_size() -> u32 {
    640
}

impl StreamConfig {
    pub fn new(id: impl Into<String>, source: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            confidence_threshold: default_confidence(),
            iou_threshold: default_iou(),
            fps_limit: default_fps(),
            model_id: model_id.into(),
            image_size: default_image_size(),
            target_classes: Vec::new(),
            region: None,
            post_policy: PostPolicyId::default(),
            time_policy: None,
            notify: None,
        }
    }

    /// Validate registration input. Rejected synchronously as a config
    /// error by the stream manager.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("stream id must not be empty".to_string());
        }
        if self.source.trim().is_empty() {
            return Err("source locator must not be empty".to_string());
        }
        if self.model_id.trim().is_empty() {
            return Err("model id must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence threshold out of range: {}",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(format!("iou threshold out of range: {}", self.iou_threshold));
        }
        if self.fps_limit < 0.0 {
            return Err(format!("fps limit must not be negative: {}", self.fps_limit));
        }
        Ok(())
    }

    /// Minimum interval between processed frames, or None when the
    /// limit is disabled.
    pub fn frame_interval(&self) -> Option<std::time::Duration> {
        if self.fps_limit > 0.0 {
            Some(std::time::Duration::from_secs_f64(1.0 / self.fps_limit))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_defaults() {
        let config = StreamConfig::new("cam-1", "rtsp://example/stream", "fire-v1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let mut config = StreamConfig::new("", "rtsp://example/stream", "fire-v1");
        assert!(config.validate().is_err());

        config = StreamConfig::new("cam-1", "rtsp://example/stream", "fire-v1");
        config.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        config = StreamConfig::new("cam-1", "rtsp://example/stream", "fire-v1");
        config.fps_limit = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_frame_interval() {
        let mut config = StreamConfig::new("cam-1", "rtsp://example/stream", "fire-v1");
        config.fps_limit = 5.0;
        assert_eq!(
            config.frame_interval(),
            Some(std::time::Duration::from_millis(200))
        );

        config.fps_limit = 0.0;
        assert_eq!(config.frame_interval(), None);
    }
}

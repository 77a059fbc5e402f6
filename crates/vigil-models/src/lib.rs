//! Shared data models for the Vigil video analysis engine.
//!
//! This crate provides Serde-serializable types for:
//! - Detections, bounding boxes and coordinate mapping
//! - Frames and detection results
//! - Session state and stream configuration
//! - Alarm rules, events and notification channels
//! - Time-window policies, detection regions and scene deployments
//! - Deterministic detection-artifact paths

pub mod alarm;
pub mod artifact;
pub mod detection;
pub mod frame;
pub mod policy;
pub mod region;
pub mod scene;
pub mod session;
pub mod stream;

// Re-export common types
pub use alarm::{
    AlarmEvent, AlarmRule, NotificationChannel, Severity, TimeOfDayRange,
};
pub use artifact::ArtifactPath;
pub use detection::{BBox, Detection, DetectionResult};
pub use frame::Frame;
pub use policy::TimePolicy;
pub use region::DetectionRegion;
pub use scene::{
    DeployOutcome, DeployRequest, DeviceBinding, DeviceSpec, FailedDevice, SceneDeployment,
};
pub use session::{SessionState, SessionStatus, SessionStatsSnapshot};
pub use stream::{NotifyTarget, PostPolicyId, StreamConfig};

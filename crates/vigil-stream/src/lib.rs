//! Stream session orchestration.
//!
//! The [`manager::StreamManager`] owns session registration and
//! lifecycle; each started session runs a [`worker`] task that pulls
//! frames from a [`source::FrameSource`], runs detection, applies
//! post-processing and feeds the alarm engine. A background
//! [`monitor::HealthMonitor`] flags stalled sessions and the
//! [`heartbeat::HeartbeatManager`] reports per-device liveness upstream.

pub mod artifact;
pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod monitor;
pub mod source;
pub mod worker;

pub use artifact::ArtifactStore;
pub use error::{ArtifactError, HeartbeatError, StreamError, StreamResult};
pub use heartbeat::{Heartbeat, HeartbeatManager, HeartbeatStats, HeartbeatTransport, HttpHeartbeatTransport};
pub use manager::{AlwaysPermitted, ManagerConfig, SessionGate, StreamManager, StreamManagerStats};
pub use monitor::HealthMonitor;
pub use source::{FrameSource, SourceConnector, SourceError};

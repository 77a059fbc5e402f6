//! Stream session error types.

use thiserror::Error;

use vigil_detect::DetectError;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// Registration input failed validation.
    #[error("Invalid stream config: {0}")]
    Config(String),

    /// A session with this id is already registered.
    #[error("Session '{0}' is already registered")]
    DuplicateId(String),

    /// Admission would exceed the configured session limit.
    #[error("Session limit reached ({limit})")]
    CapacityExceeded { limit: usize },

    /// No session registered under this id.
    #[error("Session '{0}' not found")]
    NotFound(String),

    /// Start requested while the session is already running.
    #[error("Session '{0}' is already running")]
    AlreadyRunning(String),

    /// Model loading failed during Start.
    #[error(transparent)]
    ModelLoad(#[from] DetectError),
}

/// Artifact persistence failures. Logged by the worker; never fatal to
/// the session.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("artifact encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Heartbeat delivery failures. Advisory only.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("heartbeat endpoint returned {0}")]
    Status(reqwest::StatusCode),
}

//! Alarm and notification error types.

use thiserror::Error;

pub type AlarmResult<T> = Result<T, AlarmError>;
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors from alarm rule administration.
#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("Rule '{0}' already exists")]
    DuplicateRule(String),

    #[error("Rule '{0}' not found")]
    RuleNotFound(String),
}

/// Errors from a single delivery attempt. Delivery failures never
/// propagate to session workers; the dispatcher logs and counts them.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Callback endpoint '{target}' returned status {status}")]
    Status { target: String, status: u16 },

    #[error("Circuit open for callback endpoint '{0}'")]
    CircuitOpen(String),

    #[error("Bus publish failed: {0}")]
    Bus(#[from] redis::RedisError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NotifyError {
    pub fn status(target: impl Into<String>, status: u16) -> Self {
        Self::Status {
            target: target.into(),
            status,
        }
    }
}

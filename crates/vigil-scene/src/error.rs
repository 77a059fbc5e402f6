//! Scene scheduling error types.

use thiserror::Error;

use vigil_stream::StreamError;

pub type SceneResult<T> = Result<T, SceneError>;

#[derive(Debug, Error)]
pub enum SceneError {
    /// The request named an algorithm with no registered model.
    #[error("Unknown algorithm '{0}'")]
    UnknownAlgorithm(String),

    /// The request carried no devices.
    #[error("Deploy request for scene '{0}' has no devices")]
    NoDevices(String),

    /// No live deployment under this scene id.
    #[error("Scene '{0}' not found")]
    NotFound(String),

    /// Session-level failure that aborted the whole operation.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Per-device stream lookup failures. Collected into the deploy
/// outcome's failed list; one device never aborts the deploy.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("device platform returned {status} for device '{device_id}'")]
    Status {
        device_id: String,
        status: reqwest::StatusCode,
    },

    #[error("device '{device_id}' has no stream url")]
    MissingUrl { device_id: String },

    #[error("device '{device_id}' unknown to platform")]
    UnknownDevice { device_id: String },
}

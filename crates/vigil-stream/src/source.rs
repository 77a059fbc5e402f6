//! Frame source abstraction.
//!
//! The engine never opens capture devices itself; a connector supplied
//! at construction owns the transport (RTSP, files, test fixtures).

use async_trait::async_trait;
use thiserror::Error;

use vigil_models::Frame;

/// Failure reading from or opening a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A single read failed; the source is still usable.
    #[error("Transient read failure: {0}")]
    Transient(String),

    /// The source is gone; the worker must reconnect.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

impl SourceError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }
}

/// An open video source yielding frames in decode order.
#[async_trait]
pub trait FrameSource: Send {
    /// Pull the next frame, waiting for one to become available.
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;

    /// Release the underlying transport.
    async fn close(&mut self) {}
}

/// Opens frame sources from a source locator.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self, source: &str) -> Result<Box<dyn FrameSource>, SourceError>;
}

//! Artifact persistence seam.

use async_trait::async_trait;

use vigil_models::{ArtifactPath, DetectionResult, Frame};

use crate::error::ArtifactError;

/// Persists the snapshot for a frame that produced detections.
///
/// Returns the media reference carried on the detection result and any
/// alarm it triggers. Persistence failures are logged by the worker and
/// never stall the session.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn persist(
        &self,
        frame: &Frame,
        result: &DetectionResult,
        path: &ArtifactPath,
    ) -> Result<String, ArtifactError>;
}

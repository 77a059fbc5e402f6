//! Development backends.
//!
//! Real deployments plug a capture stack and a detector runtime in at
//! these seams; the synthetic pair here keeps the agent runnable end to
//! end without either.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use vigil_detect::{DetectResult, Detector, InferOptions, ModelLoader};
use vigil_models::{ArtifactPath, Detection, DetectionResult, Frame};
use vigil_stream::{ArtifactError, ArtifactStore};

/// Detector that sees nothing.
pub struct NullDetector;

impl Detector for NullDetector {
    fn infer(&mut self, _frame: &Frame, _opts: &InferOptions) -> DetectResult<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn class_names(&self) -> HashMap<u32, String> {
        HashMap::new()
    }
}

/// Loader producing [`NullDetector`] for every model id.
pub struct NullLoader;

impl ModelLoader for NullLoader {
    fn load(&self, _model_id: &str) -> DetectResult<Box<dyn Detector>> {
        Ok(Box::new(NullDetector))
    }
}

/// Source producing blank frames at a fixed rate.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_delay: Duration,
}

#[async_trait]
impl vigil_stream::FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> Result<Frame, vigil_stream::SourceError> {
        tokio::time::sleep(self.frame_delay).await;
        Ok(Frame::new(
            self.width,
            self.height,
            vec![0u8; (self.width * self.height) as usize],
        ))
    }
}

/// Connector handing out synthetic sources for any locator.
pub struct SyntheticConnector {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Default for SyntheticConnector {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 25.0,
        }
    }
}

/// Writes detection snapshots and summaries to the local filesystem
/// under `{base}/results/{date}/{session}/...`.
pub struct FsArtifactStore {
    base_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn persist(
        &self,
        frame: &Frame,
        result: &DetectionResult,
        path: &ArtifactPath,
    ) -> Result<String, ArtifactError> {
        let dir = self.base_dir.join(&path.dir);
        tokio::fs::create_dir_all(&dir).await?;

        let info = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(self.base_dir.join(path.info_path()), info).await?;
        tokio::fs::write(self.base_dir.join(path.picture_path()), &frame.data).await?;

        Ok(path.picture_path())
    }
}

#[async_trait]
impl vigil_stream::SourceConnector for SyntheticConnector {
    async fn connect(
        &self,
        _source: &str,
    ) -> Result<Box<dyn vigil_stream::FrameSource>, vigil_stream::SourceError> {
        Ok(Box::new(SyntheticSource {
            width: self.width,
            height: self.height,
            frame_delay: Duration::from_secs_f64(1.0 / self.fps.max(1.0)),
        }))
    }
}

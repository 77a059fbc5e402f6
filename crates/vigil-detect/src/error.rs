//! Detection error types.

use thiserror::Error;

pub type DetectResult<T> = Result<T, DetectError>;

#[derive(Debug, Error)]
pub enum DetectError {
    /// Loading a model failed; surfaces synchronously from Start.
    #[error("Model load failed for '{model_id}': {reason}")]
    ModelLoad { model_id: String, reason: String },

    /// A single inference call failed; the frame is skipped and the
    /// session loop continues.
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl DetectError {
    pub fn model_load(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            model_id: model_id.into(),
            reason: reason.into(),
        }
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }
}

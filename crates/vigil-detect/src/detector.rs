//! The external detector contract.

use std::collections::HashMap;

use vigil_models::{Detection, Frame};

use crate::error::DetectResult;

/// Per-call inference parameters.
#[derive(Debug, Clone, Copy)]
pub struct InferOptions {
    /// Confidence threshold
    pub confidence: f32,
    /// Non-max-suppression IoU threshold
    pub iou: f32,
    /// Inference image size (square edge); frames larger than this are
    /// conceptually downscaled before inference
    pub image_size: u32,
}

impl Default for InferOptions {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou: 0.45,
            image_size: 640,
        }
    }
}

/// An opaque detection backend.
///
/// Implementations must tolerate repeated calls but are not expected to
/// be thread-safe; the model pool arbitrates concurrent access.
/// Returned boxes are in the coordinate space of the inference image
/// (the frame downscaled by [`inference_scale`]); the pool handle maps
/// them back to original frame coordinates.
pub trait Detector: Send {
    /// Run detection on one frame.
    fn infer(&mut self, frame: &Frame, opts: &InferOptions) -> DetectResult<Vec<Detection>>;

    /// Class id -> class name mapping for this model.
    fn class_names(&self) -> HashMap<u32, String>;
}

/// Downscale factor applied to a frame before inference.
///
/// Returns 1.0 when the frame already fits within `image_size`;
/// otherwise the factor that brings the longest edge down to it.
pub fn inference_scale(frame: &Frame, image_size: u32) -> f32 {
    let longest = frame.width.max(frame.height);
    if longest > image_size && longest > 0 {
        image_size as f32 / longest as f32
    } else {
        1.0
    }
}

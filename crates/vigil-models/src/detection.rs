//! Detection primitives and per-frame detection results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel coordinates of the original frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Center point of the box.
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Area in square pixels.
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Scale all coordinates by a uniform factor.
    ///
    /// Inference often runs on a downscaled copy of the frame; dividing
    /// the inference-space box by the downscale factor maps it back to
    /// original frame coordinates.
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
        }
    }

    /// Clamp the box to the given frame dimensions.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width as f32),
            y1: self.y1.clamp(0.0, height as f32),
            x2: self.x2.clamp(0.0, width as f32),
            y2: self.y2.clamp(0.0, height as f32),
        }
    }
}

/// A single detected object.
///
/// Produced per-frame by the model pool; immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Human-readable class name
    pub class_name: String,
    /// Numeric class id from the model
    pub class_id: u32,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Bounding box in original frame coordinates
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, class_id: u32, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_name: class_name.into(),
            class_id,
            confidence,
            bbox,
        }
    }

    /// Center of the detection's bounding box.
    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }

    /// Area of the detection's bounding box.
    pub fn area(&self) -> f32 {
        self.bbox.area()
    }
}

/// The outcome of running detection on one frame.
///
/// Created per processed frame, consumed by the alarm engine and any
/// external sinks, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Session that produced the frame
    pub session_id: String,
    /// Wall-clock time of processing
    pub timestamp: DateTime<Utc>,
    /// Monotonic frame counter within the session
    pub frame_id: u64,
    /// Detections in original frame coordinates
    pub detections: Vec<Detection>,
    /// Inference + post-processing duration
    pub processing: Duration,
    /// Optional reference URL to a persisted media artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

impl DetectionResult {
    pub fn new(session_id: impl Into<String>, frame_id: u64, detections: Vec<Detection>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            frame_id,
            detections,
            processing: Duration::ZERO,
            media_ref: None,
        }
    }

    /// Number of detections in this frame.
    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }

    /// Highest confidence among detections, if any.
    pub fn max_confidence(&self) -> Option<f32> {
        self.detections
            .iter()
            .map(|d| d.confidence)
            .fold(None, |acc, c| Some(acc.map_or(c, |a: f32| a.max(c))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_center_and_area() {
        let b = BBox::new(10.0, 20.0, 30.0, 60.0);
        assert_eq!(b.center(), (20.0, 40.0));
        assert_eq!(b.area(), 800.0);
    }

    #[test]
    fn test_bbox_scale_round_trip() {
        // Simulate inference on a frame downscaled by 0.5, then map back.
        let original = BBox::new(100.0, 50.0, 300.0, 250.0);
        let inference_space = original.scale(0.5);
        let mapped_back = inference_space.scale(1.0 / 0.5);

        assert!((mapped_back.x1 - original.x1).abs() < 1e-3);
        assert!((mapped_back.y1 - original.y1).abs() < 1e-3);
        assert!((mapped_back.x2 - original.x2).abs() < 1e-3);
        assert!((mapped_back.y2 - original.y2).abs() < 1e-3);
    }

    #[test]
    fn test_bbox_clamp() {
        let b = BBox::new(-5.0, -5.0, 700.0, 500.0).clamp_to(640, 480);
        assert_eq!(b.x1, 0.0);
        assert_eq!(b.y1, 0.0);
        assert_eq!(b.x2, 640.0);
        assert_eq!(b.y2, 480.0);
    }

    #[test]
    fn test_result_max_confidence() {
        let result = DetectionResult::new(
            "cam-1",
            7,
            vec![
                Detection::new("person", 0, 0.42, BBox::new(0.0, 0.0, 1.0, 1.0)),
                Detection::new("person", 0, 0.91, BBox::new(0.0, 0.0, 1.0, 1.0)),
            ],
        );
        assert_eq!(result.max_confidence(), Some(0.91));
        assert_eq!(result.detection_count(), 2);

        let empty = DetectionResult::new("cam-1", 8, vec![]);
        assert_eq!(empty.max_confidence(), None);
    }
}

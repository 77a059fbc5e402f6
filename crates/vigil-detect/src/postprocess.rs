//! Result post-processing policies.
//!
//! A closed set of variants behind one interface, selected by the
//! `PostPolicyId` stored on the stream config. A policy may rewrite,
//! augment or suppress the detection list; the returned bool is the
//! "continue processing" decision for the rest of the pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use vigil_models::{BBox, Detection, DetectionResult, PostPolicyId};

/// Applies a policy to a detection result; per-session state is owned
/// by the variant, keyed by session id.
pub trait PostProcessor: Send + Sync {
    /// Apply the policy. Returns false to stop processing this frame
    /// (no alarm evaluation, no stats beyond the frame counter).
    fn apply(&self, result: &mut DetectionResult) -> bool;

    /// Drop any per-session state when the session is removed.
    fn clear_session(&self, _session_id: &str) {}
}

/// Source of an ambient scalar reading (e.g. outside temperature).
/// The real lookup is an external collaborator; a fixed value stands in
/// where none is wired.
pub trait AmbientProvider: Send + Sync {
    fn reading(&self) -> f64;
}

/// Fixed-value ambient reading.
pub struct FixedAmbient(pub f64);

impl AmbientProvider for FixedAmbient {
    fn reading(&self) -> f64 {
        self.0
    }
}

/// Default policy: leave the result untouched.
struct PassThrough;

impl PostProcessor for PassThrough {
    fn apply(&self, _result: &mut DetectionResult) -> bool {
        true
    }
}

/// Synthesizes a "missing equipment" pseudo-detection when the frame
/// carries fewer than `min_count` detections of the required class.
/// Tracks consecutive violation frames per session so downstream rules
/// can debounce on the pseudo-class like any other.
struct MissingEquipment {
    class_name: String,
    min_count: usize,
    violations: Mutex<HashMap<String, u32>>,
}

impl PostProcessor for MissingEquipment {
    fn apply(&self, result: &mut DetectionResult) -> bool {
        let present = result
            .detections
            .iter()
            .filter(|d| d.class_name == self.class_name)
            .count();

        let mut violations = self.violations.lock().expect("post-processor lock poisoned");
        if present < self.min_count {
            let count = violations.entry(result.session_id.clone()).or_insert(0);
            *count += 1;
            debug!(
                session_id = %result.session_id,
                class = %self.class_name,
                present,
                required = self.min_count,
                consecutive = *count,
                "Required equipment missing"
            );
            result.detections.push(Detection::new(
                format!("missing_{}", self.class_name),
                u32::MAX,
                1.0,
                BBox::new(0.0, 0.0, 0.0, 0.0),
            ));
        } else {
            violations.remove(&result.session_id);
        }
        true
    }

    fn clear_session(&self, session_id: &str) {
        self.violations
            .lock()
            .expect("post-processor lock poisoned")
            .remove(session_id);
    }
}

/// Continues processing only while the ambient reading meets the
/// threshold; below it, the frame's detections are suppressed.
struct AmbientGate {
    threshold: f64,
    provider: Arc<dyn AmbientProvider>,
}

impl PostProcessor for AmbientGate {
    fn apply(&self, result: &mut DetectionResult) -> bool {
        let reading = self.provider.reading();
        if reading >= self.threshold {
            true
        } else {
            debug!(
                session_id = %result.session_id,
                reading,
                threshold = self.threshold,
                "Ambient reading below threshold, skipping frame"
            );
            false
        }
    }
}

/// Build the post-processor for a stream config's policy id.
pub fn build_post_processor(
    policy: &PostPolicyId,
    ambient: Arc<dyn AmbientProvider>,
) -> Arc<dyn PostProcessor> {
    match policy {
        PostPolicyId::PassThrough => Arc::new(PassThrough),
        PostPolicyId::MissingEquipment {
            class_name,
            min_count,
        } => Arc::new(MissingEquipment {
            class_name: class_name.clone(),
            min_count: *min_count,
            violations: Mutex::new(HashMap::new()),
        }),
        PostPolicyId::AmbientGate { threshold } => Arc::new(AmbientGate {
            threshold: *threshold,
            provider: ambient,
        }),
    }
}

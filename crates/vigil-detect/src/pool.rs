//! Model pool: loads detectors once and arbitrates concurrent access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, info};

use vigil_models::{Detection, Frame};

use crate::detector::{inference_scale, Detector, InferOptions};
use crate::error::DetectResult;

/// Pool-wide sharing mode, chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// One instance per model id; concurrent inference against the same
    /// model is serialized. Trades throughput for memory.
    Shared,
    /// One instance per (model id, session id); sessions infer fully in
    /// parallel. Trades memory for throughput.
    Dedicated,
}

/// Loads a detector instance for a model id.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_id: &str) -> DetectResult<Box<dyn Detector>>;
}

/// A usable detector, shared or dedicated per the pool mode.
///
/// Inference goes through an async mutex because most detector backends
/// are not thread-safe.
#[derive(Clone)]
pub struct DetectorHandle {
    inner: Arc<tokio::sync::Mutex<Box<dyn Detector>>>,
}

impl DetectorHandle {
    fn new(detector: Box<dyn Detector>) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(detector)),
        }
    }

    /// Run inference and map boxes back to original frame coordinates
    /// when the frame was downscaled for inference.
    pub async fn infer(&self, frame: &Frame, opts: &InferOptions) -> DetectResult<Vec<Detection>> {
        let scale = inference_scale(frame, opts.image_size);
        let mut detector = self.inner.lock().await;
        let mut detections = detector.infer(frame, opts)?;
        drop(detector);

        if scale != 1.0 {
            let inv = 1.0 / scale;
            for d in &mut detections {
                d.bbox = d.bbox.scale(inv).clamp_to(frame.width, frame.height);
            }
        }
        Ok(detections)
    }

    /// Class id -> class name mapping.
    pub async fn class_names(&self) -> HashMap<u32, String> {
        self.inner.lock().await.class_names()
    }
}

/// Owns detector instances and serves handles to session workers.
pub struct ModelPool {
    mode: PoolMode,
    loader: Arc<dyn ModelLoader>,
    // Key is the model id in shared mode, "model/session" in dedicated
    // mode. The OnceCell gives single-flight loading per key.
    cells: Mutex<HashMap<String, Arc<OnceCell<DetectorHandle>>>>,
}

impl ModelPool {
    pub fn new(mode: PoolMode, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            mode,
            loader,
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, model_id: &str, session_id: &str) -> String {
        match self.mode {
            PoolMode::Shared => model_id.to_string(),
            PoolMode::Dedicated => format!("{model_id}/{session_id}"),
        }
    }

    /// Get a detector handle for the session, loading the model on
    /// first use. Loading is idempotent and cached; concurrent first
    /// use does not double-load. A failed load leaves the cell empty
    /// so a later start can retry.
    pub async fn detector(&self, model_id: &str, session_id: &str) -> DetectResult<DetectorHandle> {
        let key = self.key(model_id, session_id);
        let cell = {
            let mut cells = self.cells.lock().expect("model pool lock poisoned");
            Arc::clone(cells.entry(key.clone()).or_default())
        };

        let handle = cell
            .get_or_try_init(|| async {
                info!(model_id, session_id, "Loading detector");
                self.loader.load(model_id).map(DetectorHandle::new)
            })
            .await?;

        Ok(handle.clone())
    }

    /// Drop the dedicated instance owned by a session, if any. Shared
    /// instances stay cached for other sessions.
    pub fn release_session(&self, model_id: &str, session_id: &str) {
        if self.mode == PoolMode::Dedicated {
            let key = self.key(model_id, session_id);
            let mut cells = self.cells.lock().expect("model pool lock poisoned");
            if cells.remove(&key).is_some() {
                debug!(model_id, session_id, "Released dedicated detector");
            }
        }
    }

    /// Number of loaded (or loading) detector entries.
    pub fn loaded_count(&self) -> usize {
        self.cells.lock().expect("model pool lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_models::BBox;

    struct CountingLoader {
        loads: AtomicUsize,
        fail: bool,
    }

    impl CountingLoader {
        fn new(fail: bool) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail,
            }
        }
    }

    struct StubDetector;

    impl Detector for StubDetector {
        fn infer(&mut self, _frame: &Frame, _opts: &InferOptions) -> DetectResult<Vec<Detection>> {
            Ok(vec![Detection::new(
                "person",
                0,
                0.9,
                BBox::new(10.0, 10.0, 50.0, 50.0),
            )])
        }

        fn class_names(&self) -> HashMap<u32, String> {
            HashMap::from([(0, "person".to_string())])
        }
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, model_id: &str) -> DetectResult<Box<dyn Detector>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(DetectError::model_load(model_id, "missing weights"))
            } else {
                Ok(Box::new(StubDetector))
            }
        }
    }

    #[tokio::test]
    async fn test_shared_mode_loads_once_per_model() {
        let loader = Arc::new(CountingLoader::new(false));
        let pool = ModelPool::new(PoolMode::Shared, loader.clone());

        pool.detector("m1", "s1").await.unwrap();
        pool.detector("m1", "s2").await.unwrap();
        pool.detector("m2", "s1").await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(pool.loaded_count(), 2);
    }

    #[tokio::test]
    async fn test_dedicated_mode_loads_per_session() {
        let loader = Arc::new(CountingLoader::new(false));
        let pool = ModelPool::new(PoolMode::Dedicated, loader.clone());

        pool.detector("m1", "s1").await.unwrap();
        pool.detector("m1", "s2").await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);

        pool.release_session("m1", "s1");
        assert_eq!(pool.loaded_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_surfaces_and_can_retry() {
        let loader = Arc::new(CountingLoader::new(true));
        let pool = ModelPool::new(PoolMode::Shared, loader.clone());

        assert!(pool.detector("m1", "s1").await.is_err());
        assert!(pool.detector("m1", "s1").await.is_err());
        // Both attempts actually hit the loader; failure is not cached.
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handle_maps_boxes_back_to_frame_coordinates() {
        let loader = Arc::new(CountingLoader::new(false));
        let pool = ModelPool::new(PoolMode::Shared, loader);
        let handle = pool.detector("m1", "s1").await.unwrap();

        // 1280-wide frame with a 640 inference size: scale is 0.5, so
        // inference-space boxes are doubled on the way back.
        let frame = Frame::new(1280, 720, vec![0u8; 16]);
        let detections = handle.infer(&frame, &InferOptions::default()).await.unwrap();

        assert_eq!(detections[0].bbox, BBox::new(20.0, 20.0, 100.0, 100.0));
    }
}

//! Detector seam, model pool and post-processing policies.
//!
//! The detector itself is an external collaborator; this crate owns the
//! trait it must satisfy, arbitration of concurrent access to loaded
//! instances, and the closed set of result post-processors.

pub mod detector;
pub mod error;
pub mod pool;
pub mod postprocess;

pub use detector::{inference_scale, Detector, InferOptions};
pub use error::{DetectError, DetectResult};
pub use pool::{DetectorHandle, ModelLoader, ModelPool, PoolMode};
pub use postprocess::{
    build_post_processor, AmbientProvider, FixedAmbient, PostProcessor,
};

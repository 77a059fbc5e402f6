//! Scene deployments: binding detection policies to device groups over
//! time windows.
//!
//! A scene arrives as a [`vigil_models::DeployRequest`]; the
//! [`scheduler::SceneScheduler`] resolves each device to a stream
//! source, registers and starts one session per device, and keeps the
//! session's time policy in the shared [`gate::PolicyGate`] the stream
//! workers consult every iteration. The [`expiry::ExpirationMonitor`]
//! retires deployments whose policy has an absolute end.

pub mod error;
pub mod expiry;
pub mod gate;
pub mod gateway;
pub mod scheduler;

pub use error::{GatewayError, GatewayResult, SceneError, SceneResult};
pub use expiry::ExpirationMonitor;
pub use gate::PolicyGate;
pub use gateway::{DeviceGateway, HttpDeviceGateway};
pub use scheduler::SceneScheduler;

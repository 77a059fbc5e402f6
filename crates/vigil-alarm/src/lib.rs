//! Alarm evaluation and notification delivery.
//!
//! The [`engine::AlarmEngine`] turns detection results into alarm events
//! (debounce, cooldown, time gates); the [`dispatcher::NotificationDispatcher`]
//! fans events out to delivery channels without blocking the session
//! workers that produced them.

pub mod channels;
pub mod dispatcher;
pub mod engine;
pub mod error;

pub use channels::{
    AlarmPayload, BusChannel, BusPublisher, CallbackChannel, LogChannel, RedisBusPublisher,
};
pub use dispatcher::{DispatcherStats, NotificationDispatcher, NotificationTask, NotifyChannel};
pub use engine::{AlarmEngine, AlarmEngineStats, AlarmSink};
pub use error::{AlarmError, AlarmResult, NotifyError, NotifyResult};

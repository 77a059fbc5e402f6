//! Alarm rules and events.

use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::BBox;

/// Alarm severity derived from detection confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    /// Severity thresholds: high >= 0.7, medium >= 0.5, else low.
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.7 {
            Severity::High
        } else if confidence >= 0.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// Delivery channel for alarm notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Format and log the alarm; always succeeds
    Log,
    /// HTTP POST to the session's callback endpoint
    Callback,
    /// Publish a structured event to the message bus
    Bus,
}

/// A daily time-of-day window.
///
/// `end < start` means the window wraps past midnight, e.g. 22:00-06:00
/// permits 23:30 and 02:00 but forbids 12:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDayRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeOfDayRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether the given time-of-day falls inside the window.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

/// An alarm rule evaluated against every detection result.
///
/// Loaded at startup, mutable via admin operations on the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRule {
    /// Unique rule id
    pub id: String,
    /// Display name
    pub name: String,
    /// Applicable session ids; empty means all sessions
    #[serde(default)]
    pub session_ids: Vec<String>,
    /// Applicable class names; empty means all classes
    #[serde(default)]
    pub class_names: Vec<String>,
    /// Minimum confidence for a detection to count
    pub min_confidence: f32,
    /// Required consecutive qualifying frames before triggering
    pub consecutive_frames: u32,
    /// Minimum time between triggers per (session, rule)
    pub cooldown: Duration,
    /// Optional daily time-of-day gate (may wrap past midnight)
    #[serde(default)]
    pub time_range: Option<TimeOfDayRange>,
    /// Disabled rules are skipped entirely
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Channels to fan the alarm out to
    pub channels: Vec<NotificationChannel>,
}

fn default_enabled() -> bool {
    true
}

impl AlarmRule {
    /// Create an enabled rule applying to all sessions and classes,
    /// delivering to the log channel.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            session_ids: Vec::new(),
            class_names: Vec::new(),
            min_confidence: 0.5,
            consecutive_frames: 3,
            cooldown: Duration::from_secs(30),
            time_range: None,
            enabled: true,
            channels: vec![NotificationChannel::Log],
        }
    }

    /// Whether the rule applies to the given session.
    pub fn applies_to_session(&self, session_id: &str) -> bool {
        self.session_ids.is_empty() || self.session_ids.iter().any(|s| s == session_id)
    }

    /// Whether the rule applies to the given class.
    pub fn applies_to_class(&self, class_name: &str) -> bool {
        self.class_names.is_empty() || self.class_names.iter().any(|c| c == class_name)
    }

    /// Whether the rule's time-of-day gate admits the given instant.
    pub fn in_time_range(&self, now: DateTime<Utc>) -> bool {
        match &self.time_range {
            Some(range) => range.contains(now.time()),
            None => true,
        }
    }
}

/// An alarm that passed debounce and cooldown checks.
///
/// Ephemeral; produced by the alarm engine and consumed by the
/// notification dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub confidence: f32,
    pub class_name: String,
    pub bbox: BBox,
    /// Number of consecutive qualifying frames at trigger time
    pub consecutive_count: u32,
    /// Reference to the persisted media artifact, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
}

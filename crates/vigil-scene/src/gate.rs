//! Shared session-to-policy gate.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use vigil_models::TimePolicy;
use vigil_stream::SessionGate;

/// Maps session ids to their deployment's time policy.
///
/// Written by the scene scheduler on deploy/teardown, read by every
/// session worker once per iteration, so the permitted check stays a
/// map lookup plus arithmetic.
#[derive(Default)]
pub struct PolicyGate {
    policies: RwLock<HashMap<String, TimePolicy>>,
}

impl PolicyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session_id: impl Into<String>, policy: TimePolicy) {
        self.policies
            .write()
            .expect("policy gate lock poisoned")
            .insert(session_id.into(), policy);
    }

    pub fn clear(&self, session_id: &str) {
        self.policies
            .write()
            .expect("policy gate lock poisoned")
            .remove(session_id);
    }

    pub fn policy(&self, session_id: &str) -> Option<TimePolicy> {
        self.policies
            .read()
            .expect("policy gate lock poisoned")
            .get(session_id)
            .cloned()
    }
}

impl SessionGate for PolicyGate {
    /// Sessions without a policy are always permitted.
    fn is_permitted(&self, session_id: &str) -> bool {
        self.policies
            .read()
            .expect("policy gate lock poisoned")
            .get(session_id)
            .map_or(true, |p| p.is_permitted(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vigil_models::TimeOfDayRange;

    #[test]
    fn test_unknown_session_is_permitted() {
        let gate = PolicyGate::new();
        assert!(gate.is_permitted("cam-1"));
    }

    #[test]
    fn test_policy_gates_session() {
        let gate = PolicyGate::new();
        // A window that has already ended.
        gate.set(
            "cam-1",
            TimePolicy::Absolute {
                start: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
            },
        );
        assert!(!gate.is_permitted("cam-1"));

        gate.clear("cam-1");
        assert!(gate.is_permitted("cam-1"));
    }

    #[test]
    fn test_daily_policy_round_trips() {
        let gate = PolicyGate::new();
        let policy = TimePolicy::Daily {
            window: TimeOfDayRange::new(
                chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
            ),
        };
        gate.set("cam-1", policy.clone());
        assert_eq!(gate.policy("cam-1"), Some(policy));
        assert!(gate.is_permitted("cam-1"));
    }
}

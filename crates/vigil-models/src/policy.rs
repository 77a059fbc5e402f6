//! Time-window policies gating when a session may run detection.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::alarm::TimeOfDayRange;

/// Deployment time policy, selected by the external `dateType` field.
///
/// Type 1 is an absolute datetime range, type 2 restricts by month and
/// daily window, type 3 is a perpetual daily window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "date_type")]
pub enum TimePolicy {
    /// dateType 1: permitted iff now is inside [start, end].
    #[serde(rename = "1")]
    Absolute {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// dateType 2: permitted iff the current month is listed and the
    /// time-of-day falls inside the daily window. Carries an absolute
    /// end so the deployment can expire.
    #[serde(rename = "2")]
    MonthlyDaily {
        months: Vec<u32>,
        window: TimeOfDayRange,
        end: DateTime<Utc>,
    },
    /// dateType 3: perpetual daily window, no expiry.
    #[serde(rename = "3")]
    Daily { window: TimeOfDayRange },
}

impl TimePolicy {
    /// Whether detection is permitted at the given instant.
    ///
    /// Called once per worker iteration; must stay cheap (no I/O).
    pub fn is_permitted(&self, now: DateTime<Utc>) -> bool {
        match self {
            TimePolicy::Absolute { start, end } => *start <= now && now <= *end,
            TimePolicy::MonthlyDaily { months, window, .. } => {
                months.contains(&now.month()) && window.contains(now.time())
            }
            TimePolicy::Daily { window } => window.contains(now.time()),
        }
    }

    /// Absolute expiry, if the policy has one. The scene expiration
    /// monitor retires deployments past this instant.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            TimePolicy::Absolute { end, .. } => Some(*end),
            TimePolicy::MonthlyDaily { end, .. } => Some(*end),
            TimePolicy::Daily { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_absolute_range() {
        let policy = TimePolicy::Absolute {
            start: at(2025, 6, 1, 0, 0),
            end: at(2025, 6, 30, 23, 59),
        };
        assert!(policy.is_permitted(at(2025, 6, 15, 12, 0)));
        assert!(!policy.is_permitted(at(2025, 7, 1, 0, 0)));
        assert_eq!(policy.expires_at(), Some(at(2025, 6, 30, 23, 59)));
    }

    #[test]
    fn test_monthly_daily() {
        let policy = TimePolicy::MonthlyDaily {
            months: vec![6, 7],
            window: TimeOfDayRange::new(t(8, 0), t(18, 0)),
            end: at(2025, 12, 31, 0, 0),
        };

        assert!(policy.is_permitted(at(2025, 6, 10, 12, 0)));
        assert!(!policy.is_permitted(at(2025, 6, 10, 20, 0)));
        assert!(!policy.is_permitted(at(2025, 5, 10, 12, 0)));
    }

    #[test]
    fn test_daily_wraparound() {
        let policy = TimePolicy::Daily {
            window: TimeOfDayRange::new(t(22, 0), t(6, 0)),
        };

        assert!(policy.is_permitted(at(2025, 6, 10, 23, 30)));
        assert!(policy.is_permitted(at(2025, 6, 11, 2, 0)));
        assert!(!policy.is_permitted(at(2025, 6, 10, 12, 0)));
        assert_eq!(policy.expires_at(), None);
    }
}

//! Notification fire times derived from a session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::FastingSession;

/// Fraction of the fast after which the early warning fires.
pub const WARNING_FRACTION: f64 = 0.9;

/// When the warning and completion alerts for a session are due.
///
/// Never persisted; recomputed from the session on every (re)schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSchedule {
    pub fire_at_warning: DateTime<Utc>,
    pub fire_at_completion: DateTime<Utc>,
}

impl NotificationSchedule {
    pub fn for_session(session: &FastingSession) -> Self {
        Self::from_bounds(session.start_time, session.end_time)
    }

    pub fn from_bounds(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let span_ms = (end - start).num_milliseconds().max(0);
        let warning_offset = (span_ms as f64 * WARNING_FRACTION).round() as i64;
        Self {
            fire_at_warning: start + Duration::milliseconds(warning_offset),
            fire_at_completion: end,
        }
    }

    pub fn warning_pending(&self, now: DateTime<Utc>) -> bool {
        self.fire_at_warning > now
    }

    pub fn completion_pending(&self, now: DateTime<Utc>) -> bool {
        self.fire_at_completion > now
    }

    /// Minutes between the warning and the end, rounded.
    pub fn minutes_left_at_warning(&self) -> i64 {
        let ms = (self.fire_at_completion - self.fire_at_warning).num_milliseconds();
        (ms as f64 / 60_000.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FastingDuration;
    use chrono::TimeZone;

    #[test]
    fn test_sixteen_hour_warning_at_fourteen_twenty_four() {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 19, 0, 0).unwrap();
        let session = FastingSession::begin(FastingDuration::from_hours(16.0).unwrap(), t0);
        let schedule = session.notification_schedule();
        assert_eq!(
            schedule.fire_at_warning,
            t0 + Duration::hours(14) + Duration::minutes(24)
        );
        assert_eq!(schedule.fire_at_completion, t0 + Duration::hours(16));
        assert_eq!(schedule.minutes_left_at_warning(), 96);
    }

    #[test]
    fn test_pending_checks() {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 19, 0, 0).unwrap();
        let schedule = NotificationSchedule::from_bounds(t0, t0 + Duration::hours(10));
        assert!(schedule.warning_pending(t0));
        assert!(!schedule.warning_pending(t0 + Duration::hours(9)));
        assert!(schedule.completion_pending(t0 + Duration::hours(9)));
        assert!(!schedule.completion_pending(t0 + Duration::hours(10)));
    }
}

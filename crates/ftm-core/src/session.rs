//! Fasting session entities and value objects.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::{DomainError, DomainResult};
use crate::history::{format_clock, format_duration, DurationParts, HistoryEntry};
use crate::schedule::NotificationSchedule;

/// Longest fast the timer accepts (one week).
pub const MAX_DURATION_HOURS: f64 = 168.0;

/// Durations offered by the client picker.
pub const PRESET_DURATIONS: [u32; 4] = [16, 18, 20, 24];

/// Duration used when none is chosen.
pub const DEFAULT_DURATION_HOURS: f64 = 16.0;

const MS_PER_HOUR: f64 = 3_600_000.0;

// ============================================================================
// Fasting Duration
// ============================================================================

/// Target length of a fast, in hours.
///
/// Always finite, strictly positive and at most [`MAX_DURATION_HOURS`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct FastingDuration(f64);

impl FastingDuration {
    /// Validates an hour count selected by the user.
    pub fn from_hours(hours: f64) -> DomainResult<Self> {
        if !hours.is_finite() || hours <= 0.0 || hours > MAX_DURATION_HOURS {
            return Err(DomainError::InvalidDuration {
                hours,
                max: MAX_DURATION_HOURS,
            });
        }
        Ok(Self(hours))
    }

    pub fn hours(&self) -> f64 {
        self.0
    }

    /// Duration in whole milliseconds.
    pub fn as_millis(&self) -> i64 {
        (self.0 * MS_PER_HOUR).round() as i64
    }

    pub fn as_chrono(&self) -> Duration {
        Duration::milliseconds(self.as_millis())
    }
}

impl Default for FastingDuration {
    fn default() -> Self {
        Self(16.0)
    }
}

impl TryFrom<f64> for FastingDuration {
    type Error = DomainError;

    fn try_from(hours: f64) -> Result<Self, Self::Error> {
        Self::from_hours(hours)
    }
}

impl From<FastingDuration> for f64 {
    fn from(duration: FastingDuration) -> Self {
        duration.0
    }
}

impl fmt::Display for FastingDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{}h", self.0 as i64)
        } else {
            write!(f, "{:.2}h", self.0)
        }
    }
}

// ============================================================================
// Session Status
// ============================================================================

/// Lifecycle status of a fasting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The fast is running.
    #[default]
    Active,

    /// The fast reached its target end time.
    Completed,

    /// The fast was stopped by the user before its target end time.
    Abandoned,
}

impl SessionStatus {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a fast ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Stopped by the user.
    Manual,
    /// Reached its target end time.
    Expired,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Expired => f.write_str("expired"),
        }
    }
}

// ============================================================================
// Fasting Session
// ============================================================================

/// A single timed fast.
///
/// Serializes to the persisted `currentFasting` layout:
/// `{startTime, endTime, targetDurationHours, status, lastUpdated}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FastingSession {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub target_duration_hours: f64,
    pub status: SessionStatus,
    pub last_updated: DateTime<Utc>,
}

impl FastingSession {
    /// Starts a new active session at `now`.
    pub fn begin(duration: FastingDuration, now: DateTime<Utc>) -> Self {
        Self {
            start_time: now,
            end_time: now + duration.as_chrono(),
            target_duration_hours: duration.hours(),
            status: SessionStatus::Active,
            last_updated: now,
        }
    }

    /// Rebuilds a session from stored fields, rejecting inconsistent bounds.
    pub fn from_parts(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        target_duration_hours: f64,
        status: SessionStatus,
        last_updated: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if end_time <= start_time {
            return Err(DomainError::InvalidTimeRange {
                start: start_time,
                end: end_time,
            });
        }
        FastingDuration::from_hours(target_duration_hours)?;
        Ok(Self {
            start_time,
            end_time,
            target_duration_hours,
            status,
            last_updated,
        })
    }

    /// Targeted length of the fast in milliseconds.
    pub fn target_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }

    /// `end_time - now`, floored at zero.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_milliseconds().max(0)
    }

    /// `now - start_time`, floored at zero.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_milliseconds().max(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// 0.0 ..= 1.0 progress towards the target.
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        let target = self.target_ms();
        if target <= 0 {
            return 1.0;
        }
        (self.elapsed_ms(now) as f64 / target as f64).clamp(0.0, 1.0)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now;
    }

    pub fn notification_schedule(&self) -> NotificationSchedule {
        NotificationSchedule::for_session(self)
    }

    /// Finalizes a manual stop: the entry ends at `now`, whatever the target.
    pub fn finish_manual(&mut self, now: DateTime<Utc>) -> HistoryEntry {
        let end = now.max(self.start_time);
        self.status = if end >= self.end_time {
            SessionStatus::Completed
        } else {
            SessionStatus::Abandoned
        };
        self.last_updated = now;
        debug!(
            start = %self.start_time,
            end = %end,
            status = %self.status,
            "Finalized fast on manual stop"
        );
        HistoryEntry::from_bounds(self.start_time, end)
    }

    /// Finalizes an expired fast: the entry ends at the target end time,
    /// however late the expiry was noticed.
    pub fn finish_expired(&mut self) -> HistoryEntry {
        self.status = SessionStatus::Completed;
        debug!(start = %self.start_time, end = %self.end_time, "Finalized expired fast");
        HistoryEntry::from_bounds(self.start_time, self.end_time)
    }
}

// ============================================================================
// Views
// ============================================================================

/// Read-only snapshot of the timer, suitable for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastingView {
    pub fasting: bool,
    /// `FASTING` or `NOT FASTING`.
    pub status_label: String,
    pub session: Option<FastingSession>,
    pub remaining_ms: i64,
    pub elapsed_ms: i64,
    /// Elapsed time as `hh:mm:ss`.
    pub elapsed_clock: String,
    pub remaining: DurationParts,
    pub progress_pct: f64,
    /// False when the daemon runs without durable storage.
    pub persistent: bool,
    pub at: DateTime<Utc>,
}

impl FastingView {
    pub const FASTING_LABEL: &'static str = "FASTING";
    pub const IDLE_LABEL: &'static str = "NOT FASTING";

    pub fn idle(now: DateTime<Utc>, persistent: bool) -> Self {
        Self {
            fasting: false,
            status_label: Self::IDLE_LABEL.to_string(),
            session: None,
            remaining_ms: 0,
            elapsed_ms: 0,
            elapsed_clock: format_clock(0),
            remaining: DurationParts::default(),
            progress_pct: 0.0,
            persistent,
            at: now,
        }
    }

    pub fn fasting(session: &FastingSession, now: DateTime<Utc>, persistent: bool) -> Self {
        let remaining_ms = session.remaining_ms(now);
        let elapsed_ms = session.elapsed_ms(now);
        Self {
            fasting: true,
            status_label: Self::FASTING_LABEL.to_string(),
            session: Some(session.clone()),
            remaining_ms,
            elapsed_ms,
            elapsed_clock: format_clock(elapsed_ms),
            remaining: format_duration(remaining_ms),
            progress_pct: session.progress(now) * 100.0,
            persistent,
            at: now,
        }
    }
}

/// Remaining time and projected end for a duration the user is considering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemainingPreview {
    pub duration_hours: f64,
    pub hours: i64,
    pub minutes: i64,
    pub end_time: DateTime<Utc>,
}

impl RemainingPreview {
    pub fn for_duration(duration: FastingDuration, now: DateTime<Utc>) -> Self {
        let parts = format_duration(duration.as_millis());
        Self {
            duration_hours: duration.hours(),
            hours: parts.hours,
            minutes: parts.minutes,
            end_time: now + duration.as_chrono(),
        }
    }
}

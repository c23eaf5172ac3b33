//! Completed-fast records and duration formatting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;

/// One finished fast. Immutable once recorded.
///
/// Serializes to the persisted `fastingHistory` element layout:
/// `{startTime, endTime, durationMs}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

impl HistoryEntry {
    /// Builds an entry, rejecting an end before the start.
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> DomainResult<Self> {
        if end_time < start_time {
            return Err(DomainError::InvalidTimeRange {
                start: start_time,
                end: end_time,
            });
        }
        Ok(Self::from_bounds(start_time, end_time))
    }

    pub(crate) fn from_bounds(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds().max(0),
        }
    }

    pub fn duration_parts(&self) -> DurationParts {
        format_duration(self.duration_ms)
    }
}

/// Whole hours and minutes of a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DurationParts {
    pub hours: i64,
    pub minutes: i64,
}

impl fmt::Display for DurationParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h {}m", self.hours, self.minutes)
    }
}

/// Splits milliseconds into hours and minutes, truncating.
pub fn format_duration(ms: i64) -> DurationParts {
    let ms = ms.max(0);
    DurationParts {
        hours: ms / MS_PER_HOUR,
        minutes: (ms % MS_PER_HOUR) / MS_PER_MINUTE,
    }
}

/// Renders milliseconds as `hh:mm:ss`. Hours are not wrapped.
pub fn format_clock(ms: i64) -> String {
    let ms = ms.max(0);
    let hours = ms / MS_PER_HOUR;
    let minutes = (ms % MS_PER_HOUR) / MS_PER_MINUTE;
    let seconds = (ms % MS_PER_MINUTE) / MS_PER_SECOND;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

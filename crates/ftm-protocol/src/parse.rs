//! Tolerant parsing of persisted session and history records.
//!
//! Stored values may have been written by an older client or partially
//! corrupted. Every field is optional at the serde layer and validated
//! here, so a bad record surfaces as [`DomainError::CorruptSessionData`]
//! instead of a deserialization panic further down.

use chrono::{DateTime, TimeZone, Utc};
use ftm_core::{DomainError, DomainResult, FastingSession, HistoryEntry, SessionStatus};
use serde::{Deserialize, Serialize};

/// Timestamp as stored: RFC 3339 text or epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Text(String),
    Millis(i64),
}

impl RawTimestamp {
    fn resolve(&self, field: &str) -> DomainResult<DateTime<Utc>> {
        match self {
            Self::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| DomainError::corrupt(format!("{field}: {e}"))),
            Self::Millis(ms) => Utc
                .timestamp_millis_opt(*ms)
                .single()
                .ok_or_else(|| DomainError::corrupt(format!("{field}: out of range ({ms})"))),
        }
    }
}

/// Raw `currentFasting` record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSessionRecord {
    #[serde(default)]
    pub start_time: Option<RawTimestamp>,
    #[serde(default)]
    pub end_time: Option<RawTimestamp>,
    #[serde(default)]
    pub target_duration_hours: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_updated: Option<RawTimestamp>,
}

impl RawSessionRecord {
    /// Validates into a session.
    ///
    /// `startTime` and `endTime` are required. A missing target is derived
    /// from the bounds, a missing status is `active` and a missing
    /// `lastUpdated` falls back to the start.
    pub fn into_session(self) -> DomainResult<FastingSession> {
        let start = self
            .start_time
            .as_ref()
            .ok_or_else(|| DomainError::corrupt("missing startTime"))?
            .resolve("startTime")?;
        let end = self
            .end_time
            .as_ref()
            .ok_or_else(|| DomainError::corrupt("missing endTime"))?
            .resolve("endTime")?;

        let target = match self.target_duration_hours {
            Some(hours) => hours,
            None => (end - start).num_milliseconds() as f64 / 3_600_000.0,
        };

        let status = match self.status.as_deref() {
            None | Some("active") => SessionStatus::Active,
            Some("completed") => SessionStatus::Completed,
            Some("abandoned") => SessionStatus::Abandoned,
            Some(other) => return Err(DomainError::corrupt(format!("unknown status {other:?}"))),
        };

        let last_updated = match &self.last_updated {
            Some(ts) => ts.resolve("lastUpdated")?,
            None => start,
        };

        FastingSession::from_parts(start, end, target, status, last_updated)
            .map_err(DomainError::corrupt)
    }
}

/// Raw `fastingHistory` element.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHistoryEntry {
    #[serde(default)]
    pub start_time: Option<RawTimestamp>,
    #[serde(default)]
    pub end_time: Option<RawTimestamp>,
    /// Informational; the duration is always recomputed from the bounds.
    #[serde(default, alias = "duration")]
    pub duration_ms: Option<i64>,
}

impl RawHistoryEntry {
    pub fn into_entry(self) -> DomainResult<HistoryEntry> {
        let start = self
            .start_time
            .as_ref()
            .ok_or_else(|| DomainError::corrupt("history entry without startTime"))?
            .resolve("startTime")?;
        let end = self
            .end_time
            .as_ref()
            .ok_or_else(|| DomainError::corrupt("history entry without endTime"))?
            .resolve("endTime")?;
        HistoryEntry::new(start, end).map_err(DomainError::corrupt)
    }
}

/// Parses a stored `currentFasting` value.
pub fn parse_session(json: &str) -> DomainResult<FastingSession> {
    let raw: RawSessionRecord = serde_json::from_str(json).map_err(DomainError::corrupt)?;
    raw.into_session()
}

/// Result of reading a stored history list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedHistory {
    pub entries: Vec<HistoryEntry>,
    /// Elements that were present but unusable.
    pub skipped: usize,
}

/// Parses a stored `fastingHistory` value.
///
/// A value that is not a JSON array is corrupt as a whole. Individual
/// unusable elements are dropped and counted.
pub fn parse_history(json: &str) -> DomainResult<ParsedHistory> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(json).map_err(DomainError::corrupt)?;
    let mut parsed = ParsedHistory::default();
    for value in raw {
        let entry = serde_json::from_value::<RawHistoryEntry>(value)
            .map_err(DomainError::corrupt)
            .and_then(RawHistoryEntry::into_entry);
        match entry {
            Ok(entry) => parsed.entries.push(entry),
            Err(_) => parsed.skipped += 1,
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_session_full_record() {
        let json = r#"{
            "startTime": "2026-03-01T20:00:00Z",
            "endTime": "2026-03-02T12:00:00Z",
            "targetDurationHours": 16,
            "status": "active",
            "lastUpdated": "2026-03-01T21:00:00Z"
        }"#;
        let session = parse_session(json).unwrap();
        assert_eq!(session.end_time - session.start_time, Duration::hours(16));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.target_duration_hours, 16.0);
    }

    #[test]
    fn test_parse_session_accepts_epoch_millis() {
        let json = r#"{"startTime": 1772395200000, "endTime": 1772452800000}"#;
        let session = parse_session(json).unwrap();
        assert_eq!(session.target_duration_hours, 16.0);
        assert_eq!(session.last_updated, session.start_time);
    }

    #[test]
    fn test_parse_session_missing_end_is_corrupt() {
        let err = parse_session(r#"{"startTime": "2026-03-01T20:00:00Z"}"#).unwrap_err();
        assert!(matches!(err, DomainError::CorruptSessionData { .. }));
    }

    #[test]
    fn test_parse_session_inverted_range_is_corrupt() {
        let json = r#"{"startTime": "2026-03-02T20:00:00Z", "endTime": "2026-03-01T20:00:00Z"}"#;
        assert!(matches!(
            parse_session(json),
            Err(DomainError::CorruptSessionData { .. })
        ));
    }

    #[test]
    fn test_parse_session_garbage() {
        assert!(parse_session("not json").is_err());
        assert!(parse_session(r#"{"startTime": "yesterday", "endTime": "today"}"#).is_err());
        assert!(parse_session(r#"{"startTime": "2026-03-01T20:00:00Z", "endTime": "2026-03-02T12:00:00Z", "status": "paused"}"#).is_err());
    }

    #[test]
    fn test_session_serialization_parses_back() {
        let json = r#"{"startTime":"2026-03-01T20:00:00Z","endTime":"2026-03-02T14:00:00Z"}"#;
        let session = parse_session(json).unwrap();
        let stored = serde_json::to_string(&session).unwrap();
        assert_eq!(parse_session(&stored).unwrap(), session);
    }

    #[test]
    fn test_parse_history_skips_bad_elements() {
        let json = r#"[
            {"startTime": "2026-03-02T20:00:00Z", "endTime": "2026-03-03T12:00:00Z", "durationMs": 57600000},
            {"startTime": "2026-03-01T20:00:00Z"},
            42
        ]"#;
        let parsed = parse_history(json).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.entries.first().map(|e| e.duration_ms), Some(57_600_000));
    }

    #[test]
    fn test_parse_history_not_an_array() {
        assert!(parse_history(r#"{"startTime": 1}"#).is_err());
        assert_eq!(parse_history("[]").unwrap(), ParsedHistory::default());
    }
}

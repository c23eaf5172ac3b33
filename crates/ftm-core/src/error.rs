//! Domain-specific error types following panic-free policy.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Requested fasting duration is not usable
    #[error("Invalid fasting duration: {hours} hours (expected a value in (0, {max}])")]
    InvalidDuration { hours: f64, max: f64 },

    /// A session or entry whose end precedes its start
    #[error("Invalid time range: end ({end}) must be after start ({start})")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Persisted session data that cannot be turned into a session
    #[error("Corrupt session data: {reason}")]
    CorruptSessionData { reason: String },

    /// Parse error for incoming data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

impl DomainError {
    /// Creates a corrupt-data error from any displayable cause.
    pub fn corrupt<E: std::fmt::Display>(reason: E) -> Self {
        Self::CorruptSessionData {
            reason: reason.to_string(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_duration_display() {
        let err = DomainError::InvalidDuration {
            hours: -1.0,
            max: 168.0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid fasting duration: -1 hours (expected a value in (0, 168])"
        );
    }

    #[test]
    fn test_corrupt_helper() {
        let err = DomainError::corrupt("missing startTime");
        assert!(matches!(err, DomainError::CorruptSessionData { .. }));
        assert_eq!(err.to_string(), "Corrupt session data: missing startTime");
    }
}

//! FTM Core - Shared types for the fasting timer
//!
//! This crate provides the domain types shared between
//! the daemon (ftmd) and the command-line client (ftm).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod capability;
pub mod error;
pub mod history;
pub mod schedule;
pub mod session;

// Re-exports for convenience
pub use capability::{
    ClientEnvironment, DeliveryMechanism, NotificationAction, NotificationPermission,
    PlatformCapability,
};
pub use error::{DomainError, DomainResult};
pub use history::{format_clock, format_duration, DurationParts, HistoryEntry};
pub use schedule::{NotificationSchedule, WARNING_FRACTION};
pub use session::{
    FastingDuration, FastingSession, FastingView, FinishReason, RemainingPreview, SessionStatus,
    DEFAULT_DURATION_HOURS, MAX_DURATION_HOURS, PRESET_DURATIONS,
};

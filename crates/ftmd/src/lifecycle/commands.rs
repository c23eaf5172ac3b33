//! Lifecycle actor commands, errors, and events.

use chrono::{DateTime, Utc};
use ftm_core::{
    DomainError, FastingDuration, FastingSession, FastingView, FinishReason, HistoryEntry,
    NotificationAction, NotificationSchedule, RemainingPreview,
};
use ftm_protocol::{DiagnosticsReport, NoticeKind};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::notify::Notice;

// ============================================================================
// Lifecycle Commands
// ============================================================================

/// Commands sent to the lifecycle actor. Processed one at a time.
#[derive(Debug)]
pub enum LifecycleCommand {
    /// Begin a fast.
    ///
    /// # Errors
    /// - `LifecycleError::AlreadyFasting` if a fast is running
    Start {
        duration: FastingDuration,
        respond_to: oneshot::Sender<Result<FastingSession, LifecycleError>>,
    },

    /// End the running fast now.
    ///
    /// # Errors
    /// - `LifecycleError::NotFasting` if idle
    Stop {
        respond_to: oneshot::Sender<Result<HistoryEntry, LifecycleError>>,
    },

    Status {
        respond_to: oneshot::Sender<FastingView>,
    },

    /// Newest-first history; `None` uses the configured display count.
    History {
        limit: Option<usize>,
        respond_to: oneshot::Sender<HistoryPage>,
    },

    Preview {
        duration: FastingDuration,
        respond_to: oneshot::Sender<RemainingPreview>,
    },

    /// The user interface became visible: revalidate and publish a fresh tick.
    Foreground {
        respond_to: oneshot::Sender<FastingView>,
    },

    /// Re-read the persisted fast and finalize it if expired.
    ///
    /// Fire-and-forget, sent by the watchdog.
    Revalidate,

    Diagnostics {
        respond_to: oneshot::Sender<DiagnosticsReport>,
    },

    /// Notices not yet shown to any client. Drained on read.
    TakeNotices {
        respond_to: oneshot::Sender<Vec<Notice>>,
    },

    State {
        respond_to: oneshot::Sender<LifecycleState>,
    },
}

/// A slice of the history log.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub total: usize,
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Reconciling,
    Fasting,
}

// ============================================================================
// Lifecycle Errors
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LifecycleError {
    #[error("a fast is already running (started {since})")]
    AlreadyFasting { since: DateTime<Utc> },

    #[error("no fast is running")]
    NotFasting,

    #[error(transparent)]
    InvalidDuration(#[from] DomainError),

    /// The actor has shut down.
    #[error("lifecycle channel closed")]
    ChannelClosed,
}

impl LifecycleError {
    /// Stable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyFasting { .. } => "already_fasting",
            Self::NotFasting => "not_fasting",
            Self::InvalidDuration(_) => "invalid_duration",
            Self::ChannelClosed => "unavailable",
        }
    }
}

// ============================================================================
// Lifecycle Events
// ============================================================================

/// Events published to subscribers.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A fast began, or a running fast was restored at launch.
    Started {
        session: FastingSession,
        schedule: NotificationSchedule,
    },

    /// Once per timer tick while fasting, and on every foreground report.
    Tick {
        remaining_ms: i64,
        elapsed_ms: i64,
        elapsed_clock: String,
        at: DateTime<Utc>,
    },

    Finished {
        entry: HistoryEntry,
        reason: FinishReason,
    },

    Notice { kind: NoticeKind, message: String },

    Notification {
        title: String,
        body: String,
        actions: Vec<NotificationAction>,
    },
}

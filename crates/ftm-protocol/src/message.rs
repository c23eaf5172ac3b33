//! Protocol message types for daemon communication.

use crate::version::ProtocolVersion;
use chrono::{DateTime, Utc};
use ftm_core::{
    DeliveryMechanism, FastingSession, FastingView, FinishReason, HistoryEntry,
    NotificationAction, NotificationPermission, NotificationSchedule, PlatformCapability,
    RemainingPreview,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Begin a fast of the given length
    StartFast { duration_hours: f64 },

    /// End the running fast now
    StopFast,

    /// Request the current timer view
    GetStatus,

    /// Request the newest history entries
    GetHistory {
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },

    /// Remaining time and end for a duration that is being picked
    PreviewDuration { duration_hours: f64 },

    /// Subscribe to ticks, lifecycle events and notifications
    Subscribe,

    /// Unsubscribe from updates
    Unsubscribe,

    /// The user interface became visible again
    Foreground,

    /// Request the notification/storage status report
    Diagnostics,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn start_fast(duration_hours: f64) -> Self {
        Self::new(MessageType::StartFast { duration_hours })
    }

    pub fn stop_fast() -> Self {
        Self::new(MessageType::StopFast)
    }

    pub fn get_status() -> Self {
        Self::new(MessageType::GetStatus)
    }

    pub fn get_history(limit: Option<usize>) -> Self {
        Self::new(MessageType::GetHistory { limit })
    }

    pub fn preview(duration_hours: f64) -> Self {
        Self::new(MessageType::PreviewDuration { duration_hours })
    }

    pub fn subscribe() -> Self {
        Self::new(MessageType::Subscribe)
    }

    pub fn foreground() -> Self {
        Self::new(MessageType::Foreground)
    }

    pub fn diagnostics() -> Self {
        Self::new(MessageType::Diagnostics)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// User-visible conditions surfaced alongside normal responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Durable storage could not be opened; the fast lives in memory only.
    StorageUnavailable,
    /// The platform needs the app installed before it can notify.
    InstallGuidance,
    /// The push relay refused or failed the subscription.
    PushSubscriptionFailed,
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StorageUnavailable => "storage unavailable",
            Self::InstallGuidance => "install required for notifications",
            Self::PushSubscriptionFailed => "push subscription failed",
        };
        f.write_str(label)
    }
}

/// Snapshot of how the daemon is set up to notify and persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub daemon_version: String,
    pub protocol_version: ProtocolVersion,
    pub capability: PlatformCapability,
    pub permission: NotificationPermission,
    pub delivery: DeliveryMechanism,
    pub relay_configured: bool,
    pub push_subscribed: bool,
    /// False when running on the in-memory fallback store.
    pub persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    pub fasting: bool,
    pub history_len: usize,
    pub notices: Vec<NoticeKind>,
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Current timer view
    Status { view: Box<FastingView> },

    /// One second of a running fast
    Tick {
        remaining_ms: i64,
        elapsed_ms: i64,
        elapsed_clock: String,
        at: DateTime<Utc>,
    },

    /// A fast began (or was restored at launch)
    FastStarted {
        session: FastingSession,
        schedule: NotificationSchedule,
    },

    /// A fast was finalized and recorded
    FastFinished {
        entry: HistoryEntry,
        reason: FinishReason,
    },

    /// Newest-first history slice
    History {
        entries: Vec<HistoryEntry>,
        total: usize,
    },

    /// Preview for a candidate duration
    Remaining { preview: RemainingPreview },

    /// A user-visible condition
    Notice { kind: NoticeKind, message: String },

    /// An alert to present to the user
    Notification {
        title: String,
        body: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        actions: Vec<NotificationAction>,
    },

    /// Notification/storage status report
    Diagnostics { report: Box<DiagnosticsReport> },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn status(view: FastingView) -> Self {
        Self::Status {
            view: Box::new(view),
        }
    }

    pub fn history(entries: Vec<HistoryEntry>, total: usize) -> Self {
        Self::History { entries, total }
    }

    pub fn notice(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self::Notice {
            kind,
            message: message.into(),
        }
    }

    pub fn diagnostics(report: DiagnosticsReport) -> Self {
        Self::Diagnostics {
            report: Box::new(report),
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}

//! FTM Protocol - Wire protocol for daemon communication
//!
//! This crate provides the JSON-lines messages exchanged between the
//! `ftm` client and the `ftmd` daemon, the tolerant parsers for the
//! persisted session records, and the push relay payloads.

pub mod message;
pub mod parse;
pub mod relay;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, DiagnosticsReport, MessageType, NoticeKind};
pub use parse::{parse_history, parse_session, ParsedHistory, RawHistoryEntry, RawSessionRecord};
pub use relay::{NotifyRequest, NotifyResponse, PushKeys, PushSubscription};
pub use version::ProtocolVersion;

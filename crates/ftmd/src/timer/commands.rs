//! Timer actor messages, events and errors.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

/// Identifies one armed run, so events from a replaced run can be ignored.
pub type RunId = u64;

/// Messages sent to the timer actor.
#[derive(Debug)]
pub enum TimerMessage {
    /// Arm the timer for `[start_time, end_time]`, replacing any armed run.
    ///
    /// Both bounds are optional on the wire; a missing bound or an
    /// `end_time` not after `start_time` is rejected and the timer keeps
    /// its prior state.
    Start {
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        respond_to: oneshot::Sender<Result<RunId, TimerError>>,
    },

    /// Disarm. Acknowledged once no further events will be produced.
    Stop { respond_to: oneshot::Sender<()> },

    /// Currently armed run, if any.
    Query {
        respond_to: oneshot::Sender<Option<ArmedRun>>,
    },
}

/// Events produced while armed.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    /// `time_left_ms` is `end_time - now`, recomputed from the clock.
    Tick {
        run_id: RunId,
        time_left_ms: i64,
        now: DateTime<Utc>,
    },

    /// Exactly once per run, when `now >= end_time`. The run is disarmed.
    Completed { run_id: RunId, now: DateTime<Utc> },
}

impl TimerEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            Self::Tick { run_id, .. } | Self::Completed { run_id, .. } => *run_id,
        }
    }
}

/// A run the timer is currently counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedRun {
    pub id: RunId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TimerError {
    #[error("timer start is missing {0}")]
    MissingBound(&'static str),

    #[error("timer end ({end}) must be after start ({start})")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("timer channel closed")]
    ChannelClosed,
}

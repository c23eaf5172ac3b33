//! Client interface for the lifecycle actor.
//!
//! # Panic-Free Guarantees
//!
//! Channel errors are mapped to `LifecycleError::ChannelClosed`.

use ftm_core::{FastingDuration, FastingSession, FastingView, HistoryEntry, RemainingPreview};
use ftm_protocol::DiagnosticsReport;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::notify::Notice;

use super::commands::{
    HistoryPage, LifecycleCommand, LifecycleError, LifecycleEvent, LifecycleState,
};

/// Cheap-to-clone handle shared by every connection.
#[derive(Clone)]
pub struct LifecycleHandle {
    sender: mpsc::Sender<LifecycleCommand>,
    event_sender: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleHandle {
    pub fn new(
        sender: mpsc::Sender<LifecycleCommand>,
        event_sender: broadcast::Sender<LifecycleEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Starts a fast of `hours`.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidDuration` if `hours` is not a usable duration
    /// - `LifecycleError::AlreadyFasting` if a fast is running
    /// - `LifecycleError::ChannelClosed` if the actor has shut down
    pub async fn start(&self, hours: f64) -> Result<FastingSession, LifecycleError> {
        let duration = FastingDuration::from_hours(hours)?;
        self.request(|respond_to| LifecycleCommand::Start {
            duration,
            respond_to,
        })
        .await?
    }

    /// Stops the running fast, returning the recorded history entry.
    pub async fn stop(&self) -> Result<HistoryEntry, LifecycleError> {
        self.request(|respond_to| LifecycleCommand::Stop { respond_to })
            .await?
    }

    pub async fn status(&self) -> Result<FastingView, LifecycleError> {
        self.request(|respond_to| LifecycleCommand::Status { respond_to })
            .await
    }

    pub async fn history(&self, limit: Option<usize>) -> Result<HistoryPage, LifecycleError> {
        self.request(|respond_to| LifecycleCommand::History { limit, respond_to })
            .await
    }

    /// How long a fast of `hours` would last and when it would end.
    pub async fn preview(&self, hours: f64) -> Result<RemainingPreview, LifecycleError> {
        let duration = FastingDuration::from_hours(hours)?;
        self.request(|respond_to| LifecycleCommand::Preview {
            duration,
            respond_to,
        })
        .await
    }

    pub async fn foreground(&self) -> Result<FastingView, LifecycleError> {
        self.request(|respond_to| LifecycleCommand::Foreground { respond_to })
            .await
    }

    /// Fire-and-forget expiry check.
    pub async fn revalidate(&self) -> Result<(), LifecycleError> {
        self.sender
            .send(LifecycleCommand::Revalidate)
            .await
            .map_err(|_| LifecycleError::ChannelClosed)
    }

    pub async fn diagnostics(&self) -> Result<DiagnosticsReport, LifecycleError> {
        self.request(|respond_to| LifecycleCommand::Diagnostics { respond_to })
            .await
    }

    pub async fn take_notices(&self) -> Result<Vec<Notice>, LifecycleError> {
        self.request(|respond_to| LifecycleCommand::TakeNotices { respond_to })
            .await
    }

    pub async fn state(&self) -> Result<LifecycleState, LifecycleError> {
        self.request(|respond_to| LifecycleCommand::State { respond_to })
            .await
    }

    /// Subscribes to lifecycle events. Slow receivers see `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_sender.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LifecycleCommand,
    ) -> Result<T, LifecycleError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| LifecycleError::ChannelClosed)?;
        rx.await.map_err(|_| LifecycleError::ChannelClosed)
    }
}

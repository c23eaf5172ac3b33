//! Client interface for the timer actor.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use super::commands::{ArmedRun, RunId, TimerError, TimerMessage};

/// Cheap-to-clone handle to the timer actor.
#[derive(Clone)]
pub struct TimerHandle {
    sender: mpsc::Sender<TimerMessage>,
}

impl TimerHandle {
    pub fn new(sender: mpsc::Sender<TimerMessage>) -> Self {
        Self { sender }
    }

    /// Arms the timer for a validated range.
    pub async fn start(
        &self,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<RunId, TimerError> {
        self.start_raw(Some(start_time), Some(end_time)).await
    }

    /// Arms the timer from possibly incomplete bounds.
    ///
    /// # Errors
    ///
    /// - `TimerError::MissingBound` if either bound is absent
    /// - `TimerError::InvalidRange` if `end_time <= start_time`
    /// - `TimerError::ChannelClosed` if the actor has shut down
    pub async fn start_raw(
        &self,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<RunId, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TimerMessage::Start {
                start_time,
                end_time,
                respond_to: tx,
            })
            .await
            .map_err(|_| TimerError::ChannelClosed)?;
        rx.await.map_err(|_| TimerError::ChannelClosed)?
    }

    /// Disarms the timer and waits for the acknowledgement.
    pub async fn stop(&self) -> Result<(), TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TimerMessage::Stop { respond_to: tx })
            .await
            .map_err(|_| TimerError::ChannelClosed)?;
        rx.await.map_err(|_| TimerError::ChannelClosed)
    }

    pub async fn armed(&self) -> Result<Option<ArmedRun>, TimerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(TimerMessage::Query { respond_to: tx })
            .await
            .map_err(|_| TimerError::ChannelClosed)?;
        rx.await.map_err(|_| TimerError::ChannelClosed)
    }
}

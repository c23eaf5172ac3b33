//! Background timer using the actor pattern.
//!
//! ```text
//! ┌──────────────────┐  TimerMessage   ┌──────────────┐  TimerEvent
//! │ LifecycleManager │───────────────▶│  TimerActor  │──────────────▶ LifecycleManager
//! └──────────────────┘   (mpsc)        └──────────────┘  (unbounded)
//! ```
//!
//! Events go through an unbounded channel so the actor never waits on its
//! consumer while the consumer is waiting on a stop acknowledgement.

use std::time::Duration;

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::{drift, evaluate, validate_bounds, TickOutcome, TimerActor, DRIFT_THRESHOLD_MS};
pub use commands::{ArmedRun, RunId, TimerError, TimerEvent, TimerMessage};
pub use handle::TimerHandle;

use crate::clock::SharedClock;

const COMMAND_BUFFER: usize = 32;

/// Spawns the timer actor, returning its handle and event stream.
pub fn spawn_timer(
    clock: SharedClock,
    tick_interval: Duration,
) -> (TimerHandle, mpsc::UnboundedReceiver<TimerEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let actor = TimerActor::new(cmd_rx, event_tx, clock, tick_interval);
    tokio::spawn(actor.run());

    (TimerHandle::new(cmd_tx), event_rx)
}

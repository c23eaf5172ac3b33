//! Timer actor - owns the armed run and the tick interval.
//!
//! Remaining time is derived from the injected clock on every tick, so a
//! suspended process resumes with the correct value on its next tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;

use super::commands::{ArmedRun, RunId, TimerError, TimerEvent, TimerMessage};

/// Gap between consecutive ticks above which a drift warning is logged.
pub const DRIFT_THRESHOLD_MS: i64 = 2_000;

/// Result of evaluating an armed run at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { time_left_ms: i64 },
    Completed,
}

/// `end_time - now`, or `Completed` once it reaches zero.
pub fn evaluate(end_time: DateTime<Utc>, now: DateTime<Utc>) -> TickOutcome {
    let time_left_ms = (end_time - now).num_milliseconds();
    if time_left_ms <= 0 {
        TickOutcome::Completed
    } else {
        TickOutcome::Running { time_left_ms }
    }
}

/// The gap between two ticks when it counts as drift.
///
/// Intervals longer than the threshold only report gaps beyond one interval.
pub fn drift(
    last_tick_at: DateTime<Utc>,
    now: DateTime<Utc>,
    tick_interval: Duration,
) -> Option<i64> {
    let gap_ms = (now - last_tick_at).num_milliseconds();
    let interval_ms = i64::try_from(tick_interval.as_millis()).unwrap_or(i64::MAX);
    (gap_ms > DRIFT_THRESHOLD_MS.max(interval_ms)).then_some(gap_ms)
}

/// Validates raw start bounds.
pub fn validate_bounds(
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), TimerError> {
    let start = start_time.ok_or(TimerError::MissingBound("start_time"))?;
    let end = end_time.ok_or(TimerError::MissingBound("end_time"))?;
    if end <= start {
        return Err(TimerError::InvalidRange { start, end });
    }
    Ok((start, end))
}

struct Armed {
    run: ArmedRun,
    last_tick_at: DateTime<Utc>,
}

pub struct TimerActor {
    receiver: mpsc::Receiver<TimerMessage>,
    events: mpsc::UnboundedSender<TimerEvent>,
    clock: SharedClock,
    ticker: Interval,
    tick_interval: Duration,
    armed: Option<Armed>,
    next_run_id: RunId,
}

impl TimerActor {
    pub fn new(
        receiver: mpsc::Receiver<TimerMessage>,
        events: mpsc::UnboundedSender<TimerEvent>,
        clock: SharedClock,
        tick_interval: Duration,
    ) -> Self {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            receiver,
            events,
            clock,
            ticker,
            tick_interval,
            armed: None,
            next_run_id: 1,
        }
    }

    pub async fn run(mut self) {
        debug!(tick_ms = self.tick_interval.as_millis() as u64, "Timer actor starting");

        loop {
            tokio::select! {
                msg = self.receiver.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => break,
                },
                _ = self.ticker.tick(), if self.armed.is_some() => {
                    self.on_tick();
                }
            }
        }

        debug!("Timer actor stopped");
    }

    fn handle_message(&mut self, msg: TimerMessage) {
        match msg {
            TimerMessage::Start {
                start_time,
                end_time,
                respond_to,
            } => {
                let result = self.handle_start(start_time, end_time);
                let _ = respond_to.send(result);
            }
            TimerMessage::Stop { respond_to } => {
                if let Some(armed) = self.armed.take() {
                    debug!(run_id = armed.run.id, "Timer disarmed");
                }
                let _ = respond_to.send(());
            }
            TimerMessage::Query { respond_to } => {
                let _ = respond_to.send(self.armed.as_ref().map(|a| a.run));
            }
        }
    }

    fn handle_start(
        &mut self,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<RunId, TimerError> {
        let (start, end) = validate_bounds(start_time, end_time).map_err(|e| {
            warn!(error = %e, "Rejected timer start, keeping previous state");
            e
        })?;

        let id = self.next_run_id;
        self.next_run_id += 1;

        if let Some(previous) = self.armed.take() {
            debug!(replaced = previous.run.id, run_id = id, "Replacing armed timer run");
        }

        self.armed = Some(Armed {
            run: ArmedRun {
                id,
                start_time: start,
                end_time: end,
            },
            last_tick_at: self.clock.now(),
        });
        // First tick one full interval from now.
        self.ticker.reset();

        info!(run_id = id, start = %start, end = %end, "Timer armed");
        Ok(id)
    }

    fn on_tick(&mut self) {
        let now = self.clock.now();
        let Some(armed) = self.armed.as_mut() else {
            return;
        };

        if let Some(drift_ms) = drift(armed.last_tick_at, now, self.tick_interval) {
            warn!(run_id = armed.run.id, drift_ms, "Timer tick drifted");
        }
        armed.last_tick_at = now;

        let run_id = armed.run.id;
        let event = match evaluate(armed.run.end_time, now) {
            TickOutcome::Running { time_left_ms } => TimerEvent::Tick {
                run_id,
                time_left_ms,
                now,
            },
            TickOutcome::Completed => {
                self.armed = None;
                info!(run_id, "Timer completed");
                TimerEvent::Completed { run_id, now }
            }
        };

        if self.events.send(event).is_err() {
            debug!(run_id, "Timer event receiver dropped, disarming");
            self.armed = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_evaluate() {
        let end = t0() + chrono::Duration::seconds(5);
        assert_eq!(
            evaluate(end, t0()),
            TickOutcome::Running { time_left_ms: 5_000 }
        );
        assert_eq!(evaluate(end, end), TickOutcome::Completed);
        assert_eq!(
            evaluate(end, end + chrono::Duration::hours(3)),
            TickOutcome::Completed
        );
    }

    #[test]
    fn test_drift_is_the_gap_between_ticks() {
        let second = Duration::from_secs(1);
        let at = |ms: i64| t0() + chrono::Duration::milliseconds(ms);

        assert_eq!(drift(t0(), at(1_000), second), None);
        assert_eq!(drift(t0(), at(2_000), second), None);
        assert_eq!(drift(t0(), at(2_500), second), Some(2_500));
        assert_eq!(drift(t0(), at(10_000), second), Some(10_000));
    }

    #[test]
    fn test_drift_with_long_interval() {
        let minute = Duration::from_secs(60);
        let at = |ms: i64| t0() + chrono::Duration::milliseconds(ms);

        assert_eq!(drift(t0(), at(60_000), minute), None);
        assert_eq!(drift(t0(), at(70_000), minute), Some(70_000));
    }

    #[test]
    fn test_validate_bounds() {
        let end = t0() + chrono::Duration::hours(1);
        assert!(validate_bounds(Some(t0()), Some(end)).is_ok());
        assert_eq!(
            validate_bounds(None, Some(end)),
            Err(TimerError::MissingBound("start_time"))
        );
        assert_eq!(
            validate_bounds(Some(t0()), None),
            Err(TimerError::MissingBound("end_time"))
        );
        assert!(matches!(
            validate_bounds(Some(t0()), Some(t0())),
            Err(TimerError::InvalidRange { .. })
        ));
    }
}

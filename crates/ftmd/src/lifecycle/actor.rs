//! Lifecycle actor - owns the running fast and drives the timer and
//! notification scheduler.
//!
//! One command is processed at a time, so there is never more than one
//! mutation in flight. Stopping always disarms the timer (awaiting its
//! acknowledgement) and cancels notifications before the fast is recorded.

use ftm_core::{
    format_clock, FastingDuration, FastingSession, FastingView, FinishReason, HistoryEntry,
    RemainingPreview,
};
use ftm_protocol::{parse_session, DiagnosticsReport, NoticeKind, ProtocolVersion};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::history::HistoryLog;
use crate::notify::{Notice, NotificationScheduler};
use crate::store::{SharedStore, CURRENT_FASTING_KEY};
use crate::timer::{RunId, TimerEvent, TimerHandle};

use super::commands::{
    HistoryPage, LifecycleCommand, LifecycleError, LifecycleEvent, LifecycleState,
};

/// Tunables the actor needs at runtime.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    pub persist_every_ticks: u32,
    pub history_display: usize,
}

struct ActiveFast {
    session: FastingSession,
    run_id: Option<RunId>,
    ticks: u32,
}

enum Phase {
    Idle,
    Reconciling,
    Fasting(ActiveFast),
}

pub struct LifecycleManager {
    receiver: mpsc::Receiver<LifecycleCommand>,
    timer_events: mpsc::UnboundedReceiver<TimerEvent>,
    timer: TimerHandle,
    store: SharedStore,
    history: HistoryLog,
    scheduler: NotificationScheduler,
    clock: SharedClock,
    events: broadcast::Sender<LifecycleEvent>,
    settings: LifecycleSettings,
    phase: Phase,
    pending_notices: Vec<Notice>,
    notice_log: Vec<NoticeKind>,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        receiver: mpsc::Receiver<LifecycleCommand>,
        timer: TimerHandle,
        timer_events: mpsc::UnboundedReceiver<TimerEvent>,
        store: SharedStore,
        history: HistoryLog,
        scheduler: NotificationScheduler,
        clock: SharedClock,
        events: broadcast::Sender<LifecycleEvent>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            receiver,
            timer_events,
            timer,
            store,
            history,
            scheduler,
            clock,
            events,
            settings: LifecycleSettings {
                persist_every_ticks: settings.persist_every_ticks.max(1),
                ..settings
            },
            phase: Phase::Idle,
            pending_notices: Vec::new(),
            notice_log: Vec::new(),
        }
    }

    /// Queues a notice for the first client that asks.
    pub fn push_notice(&mut self, kind: NoticeKind, message: impl Into<String>) {
        let message = message.into();
        self.notice_log.push(kind);
        self.pending_notices.push((kind, message.clone()));
        self.publish(LifecycleEvent::Notice { kind, message });
    }

    /// Initializes notifications, reconciles the persisted fast, then
    /// processes commands and timer events until every handle is dropped.
    ///
    /// The watchdog holds only a weak sender, so it does not keep the
    /// actor alive.
    pub async fn run(mut self) {
        info!("Lifecycle manager starting");

        for (kind, message) in self.scheduler.initialize().await {
            self.push_notice(kind, message);
        }
        self.reconcile().await;

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(event) = self.timer_events.recv() => {
                    self.handle_timer_event(event).await;
                }
            }
        }

        self.scheduler.cancel();
        let _ = self.timer.stop().await;
        info!(fasting = self.is_fasting(), "Lifecycle manager stopped");
    }

    async fn handle_command(&mut self, cmd: LifecycleCommand) {
        match cmd {
            LifecycleCommand::Start {
                duration,
                respond_to,
            } => {
                let result = self.handle_start(duration).await;
                let _ = respond_to.send(result);
            }
            LifecycleCommand::Stop { respond_to } => {
                let result = self.handle_stop().await;
                let _ = respond_to.send(result);
            }
            LifecycleCommand::Status { respond_to } => {
                let _ = respond_to.send(self.view());
            }
            LifecycleCommand::History { limit, respond_to } => {
                let n = limit.unwrap_or(self.settings.history_display);
                let _ = respond_to.send(HistoryPage {
                    entries: self.history.recent(n).to_vec(),
                    total: self.history.len(),
                });
            }
            LifecycleCommand::Preview {
                duration,
                respond_to,
            } => {
                let _ = respond_to.send(RemainingPreview::for_duration(duration, self.clock.now()));
            }
            LifecycleCommand::Foreground { respond_to } => {
                self.revalidate().await;
                self.publish_fresh_tick();
                let _ = respond_to.send(self.view());
            }
            LifecycleCommand::Revalidate => {
                self.revalidate().await;
            }
            LifecycleCommand::Diagnostics { respond_to } => {
                let _ = respond_to.send(self.diagnostics());
            }
            LifecycleCommand::TakeNotices { respond_to } => {
                let _ = respond_to.send(std::mem::take(&mut self.pending_notices));
            }
            LifecycleCommand::State { respond_to } => {
                let _ = respond_to.send(self.state());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    async fn handle_start(
        &mut self,
        duration: FastingDuration,
    ) -> Result<FastingSession, LifecycleError> {
        if let Phase::Fasting(active) = &self.phase {
            warn!(since = %active.session.start_time, "Start rejected, already fasting");
            return Err(LifecycleError::AlreadyFasting {
                since: active.session.start_time,
            });
        }

        let session = FastingSession::begin(duration, self.clock.now());
        self.persist_session(&session).await;
        let run_id = self.arm(&session).await;

        self.phase = Phase::Fasting(ActiveFast {
            session: session.clone(),
            run_id,
            ticks: 0,
        });

        info!(
            duration = %duration,
            start = %session.start_time,
            end = %session.end_time,
            "Fast started"
        );
        self.publish(LifecycleEvent::Started {
            session: session.clone(),
            schedule: session.notification_schedule(),
        });
        self.scheduler.announce_start(&session).await;

        Ok(session)
    }

    async fn handle_stop(&mut self) -> Result<HistoryEntry, LifecycleError> {
        let Phase::Fasting(active) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            debug!("Stop requested while idle");
            return Err(LifecycleError::NotFasting);
        };

        self.disarm().await;

        let mut session = active.session;
        let entry = session.finish_manual(self.clock.now());
        info!(
            duration_ms = entry.duration_ms,
            status = %session.status,
            "Fast stopped manually"
        );
        self.record(entry.clone()).await;
        self.publish(LifecycleEvent::Finished {
            entry: entry.clone(),
            reason: FinishReason::Manual,
        });
        Ok(entry)
    }

    /// Finalizes the running fast at its target end time.
    ///
    /// `notify` is false when the expiry is discovered at launch, so a
    /// stale completion alert is never shown.
    async fn finalize_expired(&mut self, notify: bool) {
        let Phase::Fasting(active) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return;
        };

        if let Err(e) = self.timer.stop().await {
            warn!(error = %e, "Failed to disarm timer");
        }

        let mut session = active.session;
        let entry = session.finish_expired();
        if notify {
            self.scheduler.complete(&session).await;
        } else {
            self.scheduler.cancel();
        }

        info!(
            start = %entry.start_time,
            end = %entry.end_time,
            notified = notify,
            "Fast reached its target"
        );
        self.record(entry.clone()).await;
        self.publish(LifecycleEvent::Finished {
            entry,
            reason: FinishReason::Expired,
        });
    }

    /// Restores or finalizes whatever fast was persisted before launch.
    async fn reconcile(&mut self) {
        self.phase = Phase::Reconciling;
        let now = self.clock.now();

        let stored = match self.store.get_item(CURRENT_FASTING_KEY).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted fast");
                None
            }
        };

        let Some(json) = stored else {
            debug!("No persisted fast to restore");
            self.phase = Phase::Idle;
            return;
        };

        match parse_session(&json) {
            Ok(session) if session.status.is_active() => {
                if session.is_expired(now) {
                    info!(end = %session.end_time, "Persisted fast expired while not running");
                    self.phase = Phase::Fasting(ActiveFast {
                        session,
                        run_id: None,
                        ticks: 0,
                    });
                    self.finalize_expired(false).await;
                } else {
                    info!(
                        remaining_ms = session.remaining_ms(now),
                        end = %session.end_time,
                        "Restoring running fast"
                    );
                    let run_id = self.arm(&session).await;
                    self.phase = Phase::Fasting(ActiveFast {
                        session: session.clone(),
                        run_id,
                        ticks: 0,
                    });
                    self.publish(LifecycleEvent::Started {
                        schedule: session.notification_schedule(),
                        session,
                    });
                }
            }
            Ok(session) => {
                debug!(status = %session.status, "Persisted fast already finalized, clearing");
                self.clear_current().await;
                self.phase = Phase::Idle;
            }
            Err(e) => {
                warn!(error = %e, "Persisted fast is corrupt, clearing");
                self.clear_current().await;
                self.phase = Phase::Idle;
            }
        }
    }

    /// Finalizes the fast if it has expired, trusting the persisted copy
    /// when it is readable. A fast still running gets its notifications
    /// re-armed from the current wall-clock time, since sleeping tasks do
    /// not see time spent suspended.
    async fn revalidate(&mut self) {
        let Phase::Fasting(active) = &self.phase else {
            return;
        };
        let session = active.session.clone();
        let in_memory_end = session.end_time;
        let now = self.clock.now();

        let persisted_end = match self.store.get_item(CURRENT_FASTING_KEY).await {
            Ok(Some(json)) => parse_session(&json).ok().map(|s| s.end_time),
            _ => None,
        };
        let end = persisted_end.unwrap_or(in_memory_end);

        if now >= end {
            info!(end = %end, "Revalidation found an expired fast");
            self.finalize_expired(true).await;
        } else {
            debug!(remaining_ms = (end - now).num_milliseconds(), "Fast still running");
            self.scheduler.schedule(&session);
        }
    }

    async fn handle_timer_event(&mut self, event: TimerEvent) {
        let Phase::Fasting(active) = &mut self.phase else {
            debug!(run_id = event.run_id(), "Timer event while idle, ignoring");
            return;
        };
        if active.run_id != Some(event.run_id()) {
            debug!(run_id = event.run_id(), "Stale timer event, ignoring");
            return;
        }

        match event {
            TimerEvent::Tick {
                time_left_ms, now, ..
            } => {
                active.ticks = active.ticks.wrapping_add(1);
                let persist = active.ticks % self.settings.persist_every_ticks == 0;
                if persist {
                    active.session.touch(now);
                }
                let elapsed_ms = active.session.elapsed_ms(now);
                let snapshot = persist.then(|| active.session.clone());

                self.publish(LifecycleEvent::Tick {
                    remaining_ms: time_left_ms.max(0),
                    elapsed_ms,
                    elapsed_clock: format_clock(elapsed_ms),
                    at: now,
                });

                if let Some(session) = snapshot {
                    debug!(last_updated = %session.last_updated, "Persisting fast progress");
                    self.persist_session(&session).await;
                }
            }
            TimerEvent::Completed { .. } => {
                active.run_id = None;
                self.finalize_expired(true).await;
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn arm(&mut self, session: &FastingSession) -> Option<RunId> {
        let run_id = match self.timer.start(session.start_time, session.end_time).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Failed to arm timer, relying on the watchdog");
                None
            }
        };
        self.scheduler.schedule(session);
        run_id
    }

    async fn disarm(&mut self) {
        if let Err(e) = self.timer.stop().await {
            warn!(error = %e, "Failed to disarm timer");
        }
        self.scheduler.cancel();
    }

    /// Writes the session. Failures are logged; the fast continues in memory.
    async fn persist_session(&self, session: &FastingSession) {
        let json = match serde_json::to_string(session) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize fast");
                return;
            }
        };
        if let Err(e) = self.store.set_item(CURRENT_FASTING_KEY, &json).await {
            warn!(error = %e, "Storage write failed, fast continues in memory only");
        }
    }

    async fn clear_current(&self) {
        if let Err(e) = self.store.remove_item(CURRENT_FASTING_KEY).await {
            warn!(error = %e, "Failed to clear persisted fast");
        }
    }

    async fn record(&mut self, entry: HistoryEntry) {
        if let Err(e) = self.history.append(entry).await {
            warn!(error = %e, "Failed to persist history");
        }
        self.clear_current().await;
    }

    fn publish_fresh_tick(&self) {
        if let Phase::Fasting(active) = &self.phase {
            let now = self.clock.now();
            let elapsed_ms = active.session.elapsed_ms(now);
            self.publish(LifecycleEvent::Tick {
                remaining_ms: active.session.remaining_ms(now),
                elapsed_ms,
                elapsed_clock: format_clock(elapsed_ms),
                at: now,
            });
        }
    }

    fn publish(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn is_fasting(&self) -> bool {
        matches!(self.phase, Phase::Fasting(_))
    }

    fn state(&self) -> LifecycleState {
        match self.phase {
            Phase::Idle => LifecycleState::Idle,
            Phase::Reconciling => LifecycleState::Reconciling,
            Phase::Fasting(_) => LifecycleState::Fasting,
        }
    }

    fn view(&self) -> FastingView {
        let now = self.clock.now();
        let persistent = self.store.is_persistent();
        match &self.phase {
            Phase::Fasting(active) => FastingView::fasting(&active.session, now, persistent),
            _ => FastingView::idle(now, persistent),
        }
    }

    fn diagnostics(&self) -> DiagnosticsReport {
        DiagnosticsReport {
            daemon_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: ProtocolVersion::CURRENT,
            capability: self.scheduler.capability(),
            permission: self.scheduler.permission(),
            delivery: self.scheduler.delivery().clone(),
            relay_configured: self.scheduler.relay_configured(),
            push_subscribed: self.scheduler.push_subscribed(),
            persistent: self.store.is_persistent(),
            storage_path: self.store.location(),
            fasting: self.is_fasting(),
            history_len: self.history.len(),
            notices: self.notice_log.clone(),
        }
    }
}

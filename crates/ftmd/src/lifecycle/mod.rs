//! Session lifecycle using the actor pattern.
//!
//! The manager owns the running fast. It is the only writer of the
//! `currentFasting` and `fastingHistory` keys, the only caller of the timer
//! and the only user of the notification scheduler.
//!
//! ```text
//! ┌──────────────┐ LifecycleCommand ┌──────────────────┐ LifecycleEvent ┌────────────┐
//! │ DaemonServer │────────────────▶│ LifecycleManager │──────────────▶│ Subscribers│
//! └──────────────┘     (mpsc)       └───┬─────▲────────┘  (broadcast)   └────────────┘
//!        Watchdog ── Revalidate ───────▶│     │ TimerEvent
//!                                       ▼     │
//!                                   ┌─────────┴──┐
//!                                   │ TimerActor │
//!                                   └────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Storage failures degrade to in-memory operation
//! - Channel operations handle closure gracefully

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ftm_core::{NotificationPermission, PlatformCapability};
use ftm_protocol::{NoticeKind, PushSubscription};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::DaemonConfig;
use crate::history::{HistoryLog, DEFAULT_RETENTION};
use crate::notify::{ChannelSink, NotificationScheduler, NotificationSink, NotifyError, RelayClient};
use crate::store::{open_store, SharedStore};
use crate::timer::spawn_timer;

mod actor;
mod commands;
mod handle;

pub use actor::{LifecycleManager, LifecycleSettings};
pub use commands::{
    HistoryPage, LifecycleCommand, LifecycleError, LifecycleEvent, LifecycleState,
};
pub use handle::LifecycleHandle;

const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 256;

/// Shown once when the store could not be opened.
pub const STORAGE_UNAVAILABLE_MESSAGE: &str =
    "Storage is unavailable. Your fast will not survive a daemon restart.";

/// Runtime settings for the lifecycle manager and its helpers.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub tick_interval: Duration,
    pub watchdog_interval: Duration,
    pub persist_every_ticks: u32,
    pub history_retention: usize,
    pub history_display: usize,
    pub capability: PlatformCapability,
    /// Permission the default sink reports when asked.
    pub permission: NotificationPermission,
    pub relay: Option<RelayClient>,
    pub subscription: Option<PushSubscription>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            watchdog_interval: Duration::from_secs(300),
            persist_every_ticks: 60,
            history_retention: DEFAULT_RETENTION,
            history_display: 5,
            capability: PlatformCapability::BrowserTab,
            permission: NotificationPermission::Granted,
            relay: None,
            subscription: None,
        }
    }
}

impl LifecycleConfig {
    /// Builds the runtime settings, creating the relay client if configured.
    pub fn from_daemon_config(config: &DaemonConfig) -> Result<Self, NotifyError> {
        let (relay, subscription) = match &config.relay {
            Some(relay) => (Some(RelayClient::new(&relay.url)?), relay.subscription()),
            None => (None, None),
        };
        Ok(Self {
            tick_interval: config.tick_interval(),
            watchdog_interval: config.watchdog_interval(),
            persist_every_ticks: config.persist_every_ticks,
            history_retention: config.history_retention,
            history_display: config.history_display,
            capability: config.notifications.capability(),
            permission: config.notifications.permission,
            relay,
            subscription,
        })
    }
}

/// Spawns the lifecycle manager, its timer and watchdog over `store`.
///
/// Alerts are published to subscribers as `LifecycleEvent::Notification`.
pub fn spawn_lifecycle(
    store: SharedStore,
    clock: SharedClock,
    config: LifecycleConfig,
) -> LifecycleHandle {
    spawn_inner(store, clock, config, None, None)
}

/// Like [`spawn_lifecycle`] but alerts go to `sink`.
pub fn spawn_lifecycle_with_sink(
    store: SharedStore,
    clock: SharedClock,
    config: LifecycleConfig,
    sink: Arc<dyn NotificationSink>,
) -> LifecycleHandle {
    spawn_inner(store, clock, config, Some(sink), None)
}

/// Opens the SQLite store at `db_path` (falling back to memory) and spawns
/// the lifecycle manager over it.
pub async fn spawn_with_storage(
    db_path: &Path,
    clock: SharedClock,
    config: LifecycleConfig,
) -> LifecycleHandle {
    let (store, init_error) = open_store(db_path).await;
    let notice = init_error.map(|e| {
        debug!(error = %e, "Raising storage notice");
        STORAGE_UNAVAILABLE_MESSAGE.to_string()
    });
    spawn_inner(store, clock, config, None, notice)
}

fn spawn_inner(
    store: SharedStore,
    clock: SharedClock,
    config: LifecycleConfig,
    sink: Option<Arc<dyn NotificationSink>>,
    storage_notice: Option<String>,
) -> LifecycleHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let sink: Arc<dyn NotificationSink> = match sink {
        Some(sink) => sink,
        None => Arc::new(ChannelSink::new(event_tx.clone(), config.permission)),
    };
    let scheduler = NotificationScheduler::new(
        config.capability,
        sink,
        config.relay,
        config.subscription,
        Arc::clone(&clock),
    );
    let (timer, timer_events) = spawn_timer(Arc::clone(&clock), config.tick_interval);
    let settings = LifecycleSettings {
        persist_every_ticks: config.persist_every_ticks,
        history_display: config.history_display,
    };

    let actor_events = event_tx.clone();
    let retention = config.history_retention;
    tokio::spawn(async move {
        let history = HistoryLog::load(Arc::clone(&store), retention).await;
        let mut manager = LifecycleManager::new(
            cmd_rx,
            timer,
            timer_events,
            store,
            history,
            scheduler,
            clock,
            actor_events,
            settings,
        );
        if let Some(message) = storage_notice {
            manager.push_notice(NoticeKind::StorageUnavailable, message);
        }
        manager.run().await;
    });

    spawn_watchdog(cmd_tx.downgrade(), config.watchdog_interval);

    LifecycleHandle::new(cmd_tx, event_tx)
}

/// Periodically asks the manager to revalidate the running fast.
///
/// Stops once every [`LifecycleHandle`] is gone.
fn spawn_watchdog(sender: mpsc::WeakSender<LifecycleCommand>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(sender) = sender.upgrade() else {
                debug!("Watchdog stopping: every handle dropped");
                break;
            };
            if sender.send(LifecycleCommand::Revalidate).await.is_err() {
                debug!("Watchdog stopping: lifecycle channel closed");
                break;
            }

            debug!("Triggered fast revalidation");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::tests::RecordingSink;
    use crate::notify::AlertKind;
    use crate::store::{KeyValueStore, MemoryStore, CURRENT_FASTING_KEY, FASTING_HISTORY_KEY};
    use chrono::{DateTime, TimeZone, Utc};
    use ftm_core::FinishReason;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 19, 30, 0).unwrap()
    }

    fn fast_config() -> LifecycleConfig {
        LifecycleConfig {
            tick_interval: Duration::from_millis(10),
            ..LifecycleConfig::default()
        }
    }

    fn spawn(store: &Arc<MemoryStore>, clock: &ManualClock) -> (LifecycleHandle, Arc<RecordingSink>) {
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let handle = spawn_lifecycle_with_sink(
            Arc::clone(store) as SharedStore,
            clock.shared(),
            fast_config(),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
        );
        (handle, sink)
    }

    async fn next_finished(
        rx: &mut broadcast::Receiver<LifecycleEvent>,
    ) -> (ftm_core::HistoryEntry, FinishReason) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(LifecycleEvent::Finished { entry, reason }) => return (entry, reason),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("no finished event")
    }

    #[tokio::test]
    async fn test_actor_stops_when_handles_dropped() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let (handle, _sink) = spawn(&store, &clock);
        let mut rx = handle.subscribe();
        handle.start(16.0).await.unwrap();

        drop(handle);

        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Err(broadcast::error::RecvError::Closed) = rx.recv().await {
                    return;
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "lifecycle actor outlived its handles");
    }

    #[tokio::test]
    async fn test_start_persists_active_session() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let (handle, sink) = spawn(&store, &clock);

        let session = handle.start(16.0).await.unwrap();
        assert_eq!(session.end_time, t0() + chrono::Duration::hours(16));

        let stored = store.get_item(CURRENT_FASTING_KEY).await.unwrap().unwrap();
        let parsed = ftm_protocol::parse_session(&stored).unwrap();
        assert!(parsed.status.is_active());
        assert_eq!(parsed.end_time, session.end_time);
        assert_eq!(sink.kinds(), vec![AlertKind::Started]);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let (handle, _sink) = spawn(&store, &clock);

        handle.start(18.0).await.unwrap();
        assert_eq!(
            handle.start(16.0).await,
            Err(LifecycleError::AlreadyFasting { since: t0() })
        );
    }

    #[tokio::test]
    async fn test_invalid_duration_never_reaches_actor() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let (handle, _sink) = spawn(&store, &clock);

        assert!(matches!(
            handle.start(0.0).await,
            Err(LifecycleError::InvalidDuration(_))
        ));
        assert!(matches!(
            handle.start(f64::NAN).await,
            Err(LifecycleError::InvalidDuration(_))
        ));
        assert_eq!(handle.state().await.unwrap(), LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let (handle, _sink) = spawn(&store, &clock);

        assert_eq!(handle.stop().await, Err(LifecycleError::NotFasting));
    }

    #[tokio::test]
    async fn test_stop_clears_current_and_records_history() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let (handle, _sink) = spawn(&store, &clock);

        handle.start(16.0).await.unwrap();
        clock.advance(chrono::Duration::minutes(90));
        let entry = handle.stop().await.unwrap();

        assert_eq!(entry.duration_ms, 90 * 60 * 1000);
        assert_eq!(store.get_item(CURRENT_FASTING_KEY).await.unwrap(), None);
        let history = store.get_item(FASTING_HISTORY_KEY).await.unwrap().unwrap();
        assert_eq!(ftm_protocol::parse_history(&history).unwrap().entries.len(), 1);
        assert!(!handle.status().await.unwrap().fasting);
    }

    #[tokio::test]
    async fn test_corrupt_persisted_fast_is_cleared() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_item(CURRENT_FASTING_KEY, "{\"startTime\": 12")
            .await
            .unwrap();
        let clock = ManualClock::new(t0());
        let (handle, _sink) = spawn(&store, &clock);

        let view = handle.status().await.unwrap();
        assert!(!view.fasting);
        assert_eq!(store.get_item(CURRENT_FASTING_KEY).await.unwrap(), None);
        assert_eq!(handle.history(None).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_history_defaults_to_display_count() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let (handle, _sink) = spawn(&store, &clock);

        for _ in 0..7 {
            handle.start(16.0).await.unwrap();
            clock.advance(chrono::Duration::hours(1));
            handle.stop().await.unwrap();
            clock.advance(chrono::Duration::hours(1));
        }

        let page = handle.history(None).await.unwrap();
        assert_eq!(page.entries.len(), 5);
        assert_eq!(page.total, 7);
        assert_eq!(handle.history(Some(100)).await.unwrap().entries.len(), 7);
    }

    #[tokio::test]
    async fn test_storage_notice_is_drained_once() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let clock = ManualClock::new(t0());

        let handle =
            spawn_with_storage(&blocker.join("ftm.db"), clock.shared(), fast_config()).await;

        let notices = handle.take_notices().await.unwrap();
        assert_eq!(
            notices.first().map(|n| n.0),
            Some(NoticeKind::StorageUnavailable)
        );
        assert!(handle.take_notices().await.unwrap().is_empty());

        let report = handle.diagnostics().await.unwrap();
        assert!(!report.persistent);
        assert_eq!(report.notices, vec![NoticeKind::StorageUnavailable]);
    }

    #[tokio::test]
    async fn test_expiry_during_run_delivers_completion_once() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(t0());
        let (handle, sink) = spawn(&store, &clock);
        let mut rx = handle.subscribe();

        handle.start(16.0).await.unwrap();
        clock.advance(chrono::Duration::hours(17));

        let (entry, reason) = next_finished(&mut rx).await;
        assert_eq!(reason, FinishReason::Expired);
        assert_eq!(entry.duration_ms, 16 * 3_600_000);

        // A later revalidation finds nothing to finalize.
        handle.revalidate().await.unwrap();
        let _ = handle.status().await.unwrap();
        let completions = sink
            .kinds()
            .into_iter()
            .filter(|k| *k == AlertKind::Completion)
            .count();
        assert_eq!(completions, 1);
    }
}

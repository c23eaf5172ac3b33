//! Warning and completion notifications.
//!
//! The scheduler resolves the platform capability once, asks the sink for
//! permission, and arms one sleeping task per pending alert. Every
//! notification, permission and push failure is handled here and only
//! degrades delivery; none propagates to the lifecycle.

mod relay;

pub use relay::RelayClient;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use ftm_core::capability::INSTALL_GUIDANCE;
use ftm_core::{
    DeliveryMechanism, FastingSession, NotificationAction, NotificationPermission,
    NotificationSchedule, PlatformCapability,
};
use ftm_protocol::{NoticeKind, PushSubscription};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::lifecycle::LifecycleEvent;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("notification permission denied")]
    PermissionDenied,

    #[error("notifications unsupported on this platform")]
    Unsupported,

    #[error("push subscription failed: {0}")]
    PushSubscriptionFailed(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Which alert a notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Started,
    Warning,
    Completion,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
}

/// Where alerts end up.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn request_permission(&self) -> Result<NotificationPermission, NotifyError>;

    async fn show(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Publishes alerts to connected clients as lifecycle events.
pub struct ChannelSink {
    events: broadcast::Sender<LifecycleEvent>,
    permission: NotificationPermission,
}

impl ChannelSink {
    pub fn new(events: broadcast::Sender<LifecycleEvent>, permission: NotificationPermission) -> Self {
        Self { events, permission }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn request_permission(&self) -> Result<NotificationPermission, NotifyError> {
        Ok(self.permission)
    }

    async fn show(&self, alert: &Alert) -> Result<(), NotifyError> {
        let event = LifecycleEvent::Notification {
            title: alert.title.clone(),
            body: alert.body.clone(),
            actions: alert.actions.clone(),
        };
        if self.events.send(event).is_err() {
            debug!(title = %alert.title, "No clients connected to show notification");
        }
        Ok(())
    }
}

/// A user-visible notice raised during initialization.
pub type Notice = (NoticeKind, String);

pub struct NotificationScheduler {
    capability: PlatformCapability,
    permission: NotificationPermission,
    delivery: DeliveryMechanism,
    sink: Arc<dyn NotificationSink>,
    relay: Option<RelayClient>,
    subscription: Option<PushSubscription>,
    push_subscribed: bool,
    clock: SharedClock,
    pending: Vec<JoinHandle<()>>,
    completion_fired: Arc<AtomicBool>,
}

impl NotificationScheduler {
    pub fn new(
        capability: PlatformCapability,
        sink: Arc<dyn NotificationSink>,
        relay: Option<RelayClient>,
        subscription: Option<PushSubscription>,
        clock: SharedClock,
    ) -> Self {
        Self {
            capability,
            permission: NotificationPermission::Unsupported,
            delivery: DeliveryMechanism::Disabled,
            sink,
            relay,
            subscription,
            push_subscribed: false,
            clock,
            pending: Vec::new(),
            completion_fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolves permission and registers the push subscription.
    ///
    /// Permission is never requested on `UnsupportedMobile`. Returns the
    /// notices the user should see.
    pub async fn initialize(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();

        if !self.capability.can_request_permission() {
            self.permission = NotificationPermission::Unsupported;
            self.delivery = self.capability.delivery(self.permission);
            info!(capability = %self.capability, "Notifications need the app installed");
            notices.push((NoticeKind::InstallGuidance, INSTALL_GUIDANCE.to_string()));
            return notices;
        }

        self.permission = match self.sink.request_permission().await {
            Ok(permission) => permission,
            Err(e) => {
                warn!(error = %e, "Permission request failed, treating as unsupported");
                NotificationPermission::Unsupported
            }
        };
        self.delivery = self.capability.delivery(self.permission);

        match self.permission {
            NotificationPermission::Granted => {}
            NotificationPermission::Denied => {
                info!(error = %NotifyError::PermissionDenied, "Notifications disabled");
            }
            NotificationPermission::Unsupported => {
                info!(error = %NotifyError::Unsupported, "Notifications disabled");
            }
        }

        if self.permission == NotificationPermission::Granted
            && self.capability == PlatformCapability::Standalone
        {
            if let (Some(relay), Some(subscription)) = (&self.relay, &self.subscription) {
                match relay.subscribe(subscription).await {
                    Ok(()) => {
                        self.push_subscribed = true;
                        info!(relay = %relay.base_url(), "Registered push subscription");
                    }
                    Err(e) => {
                        warn!(error = %e, "Push subscription failed");
                        notices.push((NoticeKind::PushSubscriptionFailed, e.to_string()));
                    }
                }
            }
        }

        info!(
            capability = %self.capability,
            permission = ?self.permission,
            delivers = self.delivery.delivers(),
            "Notification scheduler initialized"
        );
        notices
    }

    /// Re-arms the warning and completion alerts for `session`.
    ///
    /// Fire times already in the past are skipped.
    pub fn schedule(&mut self, session: &FastingSession) {
        self.cancel();
        self.completion_fired = Arc::new(AtomicBool::new(false));

        if !self.delivery.delivers() {
            debug!("Notifications disabled, nothing scheduled");
            return;
        }

        let now = self.clock.now();
        let schedule = session.notification_schedule();

        if schedule.warning_pending(now) {
            let alert = warning_alert(&schedule, self.actions());
            let task = self.spawn_delayed(schedule.fire_at_warning, alert, None);
            self.pending.push(task);
        } else {
            debug!(fire_at = %schedule.fire_at_warning, "Warning time already passed");
        }

        if schedule.completion_pending(now) {
            let alert = completion_alert(session, self.actions());
            let fired = Arc::clone(&self.completion_fired);
            let task = self.spawn_delayed(schedule.fire_at_completion, alert, Some(fired));
            self.pending.push(task);
        }

        debug!(
            warning = %schedule.fire_at_warning,
            completion = %schedule.fire_at_completion,
            armed = self.pending.len(),
            "Notifications scheduled"
        );
    }

    /// Aborts every pending fire.
    pub fn cancel(&mut self) {
        let count = self.pending.len();
        for task in self.pending.drain(..) {
            task.abort();
        }
        if count > 0 {
            debug!(count, "Cancelled pending notifications");
        }
    }

    /// Delivers the completion alert now unless it already fired, then
    /// cancels the rest. Returns whether an alert was sent.
    pub async fn complete(&mut self, session: &FastingSession) -> bool {
        self.cancel();
        if !self.delivery.delivers() || self.completion_fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let alert = completion_alert(session, self.actions());
        deliver(self.sink.as_ref(), self.push_relay(), &alert).await;
        true
    }

    /// Shows the "fast started" alert.
    pub async fn announce_start(&self, session: &FastingSession) {
        if !self.delivery.delivers() {
            return;
        }
        let alert = started_alert(session, self.actions());
        deliver(self.sink.as_ref(), None, &alert).await;
    }

    pub fn capability(&self) -> PlatformCapability {
        self.capability
    }

    pub fn permission(&self) -> NotificationPermission {
        self.permission
    }

    pub fn delivery(&self) -> &DeliveryMechanism {
        &self.delivery
    }

    pub fn relay_configured(&self) -> bool {
        self.relay.is_some()
    }

    pub fn push_subscribed(&self) -> bool {
        self.push_subscribed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|t| !t.is_finished()).count()
    }

    fn actions(&self) -> Vec<NotificationAction> {
        match &self.delivery {
            DeliveryMechanism::Background { actions } => actions.clone(),
            _ => Vec::new(),
        }
    }

    /// The relay only broadcasts for installed apps.
    fn push_relay(&self) -> Option<RelayClient> {
        if self.capability == PlatformCapability::Standalone {
            self.relay.clone()
        } else {
            None
        }
    }

    fn spawn_delayed(
        &self,
        fire_at: DateTime<Utc>,
        alert: Alert,
        once: Option<Arc<AtomicBool>>,
    ) -> JoinHandle<()> {
        let delay = (fire_at - self.clock.now()).to_std().unwrap_or_default();
        let sink = Arc::clone(&self.sink);
        let relay = match alert.kind {
            AlertKind::Completion => self.push_relay(),
            _ => None,
        };

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(flag) = once {
                if flag.swap(true, Ordering::SeqCst) {
                    return;
                }
            }
            deliver(sink.as_ref(), relay, &alert).await;
        })
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn deliver(sink: &dyn NotificationSink, relay: Option<RelayClient>, alert: &Alert) {
    match sink.show(alert).await {
        Ok(()) => info!(kind = ?alert.kind, title = %alert.title, "Notification shown"),
        Err(e) => warn!(kind = ?alert.kind, error = %e, "Failed to show notification"),
    }

    if let Some(relay) = relay {
        let message = alert.body.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.notify(&message).await {
                warn!(error = %e, "Relay broadcast failed");
            }
        });
    }
}

fn hours_label(hours: f64) -> String {
    if hours.fract() == 0.0 {
        format!("{}h", hours as i64)
    } else {
        format!("{hours:.1}h")
    }
}

fn local_hhmm(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

pub fn started_alert(session: &FastingSession, actions: Vec<NotificationAction>) -> Alert {
    Alert {
        kind: AlertKind::Started,
        title: "Fast started!".to_string(),
        body: format!(
            "Your {} fast has begun. It ends at {}.",
            hours_label(session.target_duration_hours),
            local_hhmm(session.end_time)
        ),
        actions,
    }
}

pub fn warning_alert(schedule: &NotificationSchedule, actions: Vec<NotificationAction>) -> Alert {
    Alert {
        kind: AlertKind::Warning,
        title: "Fast ending soon!".to_string(),
        body: format!(
            "About {} minutes left in your fast!",
            schedule.minutes_left_at_warning()
        ),
        actions,
    }
}

pub fn completion_alert(session: &FastingSession, actions: Vec<NotificationAction>) -> Alert {
    Alert {
        kind: AlertKind::Completion,
        title: "Fast complete!".to_string(),
        body: format!(
            "Your {} fast is complete! ({})",
            hours_label(session.target_duration_hours),
            local_hhmm(session.end_time)
        ),
        actions,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use ftm_core::FastingDuration;
    use std::sync::Mutex;

    /// Records every alert it is asked to show.
    pub(crate) struct RecordingSink {
        pub permission: NotificationPermission,
        pub shown: Mutex<Vec<Alert>>,
        pub permission_requests: Mutex<u32>,
    }

    impl RecordingSink {
        pub(crate) fn new(permission: NotificationPermission) -> Arc<Self> {
            Arc::new(Self {
                permission,
                shown: Mutex::new(Vec::new()),
                permission_requests: Mutex::new(0),
            })
        }

        pub(crate) fn kinds(&self) -> Vec<AlertKind> {
            self.shown.lock().unwrap().iter().map(|a| a.kind).collect()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn request_permission(&self) -> Result<NotificationPermission, NotifyError> {
            *self.permission_requests.lock().unwrap() += 1;
            Ok(self.permission)
        }

        async fn show(&self, alert: &Alert) -> Result<(), NotifyError> {
            self.shown.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 20, 0, 0).unwrap()
    }

    fn sixteen_hours() -> FastingSession {
        FastingSession::begin(FastingDuration::from_hours(16.0).unwrap(), t0())
    }

    fn scheduler(
        capability: PlatformCapability,
        sink: Arc<RecordingSink>,
        clock: &ManualClock,
    ) -> NotificationScheduler {
        NotificationScheduler::new(capability, sink, None, None, clock.shared())
    }

    #[tokio::test]
    async fn test_unsupported_mobile_never_requests_permission() {
        let clock = ManualClock::new(t0());
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let mut sched = scheduler(PlatformCapability::UnsupportedMobile, Arc::clone(&sink), &clock);

        let notices = sched.initialize().await;
        assert_eq!(*sink.permission_requests.lock().unwrap(), 0);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices.first().map(|n| n.0), Some(NoticeKind::InstallGuidance));
        assert_eq!(sched.delivery(), &DeliveryMechanism::InstallGuidance);

        sched.schedule(&sixteen_hours());
        assert_eq!(sched.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_permission_schedules_nothing() {
        let clock = ManualClock::new(t0());
        let sink = RecordingSink::new(NotificationPermission::Denied);
        let mut sched = scheduler(PlatformCapability::BrowserTab, Arc::clone(&sink), &clock);
        assert!(sched.initialize().await.is_empty());

        sched.schedule(&sixteen_hours());
        assert_eq!(sched.pending_count(), 0);
        assert!(!sched.complete(&sixteen_hours()).await);
        assert!(sink.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_then_completion() {
        let clock = ManualClock::new(t0());
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let mut sched = scheduler(PlatformCapability::Standalone, Arc::clone(&sink), &clock);
        sched.initialize().await;

        let session = sixteen_hours();
        sched.schedule(&session);
        assert_eq!(sched.pending_count(), 2);

        // Warning at T+14h24m
        tokio::time::sleep(std::time::Duration::from_secs(14 * 3600 + 24 * 60 + 1)).await;
        assert_eq!(sink.kinds(), vec![AlertKind::Warning]);

        tokio::time::sleep(std::time::Duration::from_secs(96 * 60)).await;
        assert_eq!(sink.kinds(), vec![AlertKind::Warning, AlertKind::Completion]);

        let shown = sink.shown.lock().unwrap().clone();
        let warning = shown.first().unwrap();
        assert_eq!(warning.body, "About 96 minutes left in your fast!");
        assert_eq!(warning.actions.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_warning_is_skipped() {
        let clock = ManualClock::new(t0() + Duration::hours(15));
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let mut sched = scheduler(PlatformCapability::BrowserTab, Arc::clone(&sink), &clock);
        sched.initialize().await;

        sched.schedule(&sixteen_hours());
        assert_eq!(sched.pending_count(), 1);

        tokio::time::sleep(std::time::Duration::from_secs(3601)).await;
        assert_eq!(sink.kinds(), vec![AlertKind::Completion]);
        let shown = sink.shown.lock().unwrap().clone();
        assert!(shown.first().unwrap().actions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fires() {
        let clock = ManualClock::new(t0());
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let mut sched = scheduler(PlatformCapability::BrowserTab, Arc::clone(&sink), &clock);
        sched.initialize().await;

        sched.schedule(&sixteen_hours());
        sched.cancel();
        tokio::time::sleep(std::time::Duration::from_secs(17 * 3600)).await;
        assert!(sink.kinds().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_delivered_once() {
        let clock = ManualClock::new(t0());
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let mut sched = scheduler(PlatformCapability::BrowserTab, Arc::clone(&sink), &clock);
        sched.initialize().await;

        let session = sixteen_hours();
        sched.schedule(&session);
        tokio::time::sleep(std::time::Duration::from_secs(16 * 3600 + 1)).await;
        assert!(!sched.complete(&session).await);
        assert_eq!(
            sink.kinds()
                .iter()
                .filter(|k| **k == AlertKind::Completion)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_complete_without_schedule_delivers_now() {
        let clock = ManualClock::new(t0() + Duration::hours(16));
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let mut sched = scheduler(PlatformCapability::BrowserTab, Arc::clone(&sink), &clock);
        sched.initialize().await;

        assert!(sched.complete(&sixteen_hours()).await);
        assert!(!sched.complete(&sixteen_hours()).await);
        assert_eq!(sink.kinds(), vec![AlertKind::Completion]);
    }

    #[tokio::test]
    async fn test_push_subscription_failure_is_a_notice() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/subscribe")
            .with_status(500)
            .create_async()
            .await;

        let clock = ManualClock::new(t0());
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let mut sched = NotificationScheduler::new(
            PlatformCapability::Standalone,
            sink,
            Some(RelayClient::new(server.url()).unwrap()),
            Some(PushSubscription::new("https://push.example/1", "pk", "au")),
            clock.shared(),
        );

        let notices = sched.initialize().await;
        assert_eq!(
            notices.first().map(|n| n.0),
            Some(NoticeKind::PushSubscriptionFailed)
        );
        assert!(!sched.push_subscribed());
        // Delivery itself still works.
        assert!(sched.delivery().delivers());
    }

    #[tokio::test]
    async fn test_standalone_completion_posts_to_relay() {
        let mut server = mockito::Server::new_async().await;
        let subscribe = server
            .mock("POST", "/api/subscribe")
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;
        let notify = server
            .mock("POST", "/api/notify")
            .with_status(200)
            .with_body(r#"{"message":"Notifications sent successfully"}"#)
            .create_async()
            .await;

        let clock = ManualClock::new(t0() + Duration::hours(16));
        let sink = RecordingSink::new(NotificationPermission::Granted);
        let mut sched = NotificationScheduler::new(
            PlatformCapability::Standalone,
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            Some(RelayClient::new(server.url()).unwrap()),
            Some(PushSubscription::new("https://push.example/1", "pk", "au")),
            clock.shared(),
        );
        sched.initialize().await;
        assert!(sched.push_subscribed());

        assert!(sched.complete(&sixteen_hours()).await);

        // The relay post runs in the background.
        for _ in 0..50 {
            if notify.matched_async().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        subscribe.assert_async().await;
        notify.assert_async().await;
    }

    #[test]
    fn test_alert_texts() {
        let session = sixteen_hours();
        let completion = completion_alert(&session, Vec::new());
        assert!(completion.body.starts_with("Your 16h fast is complete!"));
        let started = started_alert(&session, Vec::new());
        assert_eq!(started.title, "Fast started!");
    }
}

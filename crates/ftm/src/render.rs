//! Plain-text rendering of daemon messages.
//!
//! Every renderer returns a `String` and takes the time zone used for
//! wall-clock times, so output is testable without touching the terminal.

use std::fmt::{Display, Write as _};

use chrono::{DateTime, TimeZone, Utc};
use ftm_core::{
    format_clock, DeliveryMechanism, FastingSession, FastingView, FinishReason, HistoryEntry,
    NotificationAction, NotificationSchedule, RemainingPreview,
};
use ftm_protocol::{DiagnosticsReport, NoticeKind};

const TIME_FORMAT: &str = "%H:%M";
const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

pub const EMPTY_HISTORY: &str = "No fasting records yet";

fn local<Tz: TimeZone>(tz: &Tz, at: DateTime<Utc>, format: &str) -> String
where
    Tz::Offset: Display,
{
    at.with_timezone(tz).format(format).to_string()
}

/// `FASTING` / `NOT FASTING`.
pub fn status(view: &FastingView) -> &str {
    &view.status_label
}

/// Elapsed clock of the current fast, `00:00:00` when idle.
pub fn timer(view: &FastingView) -> &str {
    &view.elapsed_clock
}

/// Full status block for `ftm status`.
pub fn status_block<Tz: TimeZone>(view: &FastingView, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    let mut out = String::new();
    let _ = writeln!(out, "{}", status(view));
    let _ = writeln!(out, "{}", timer(view));

    if let Some(session) = view.session.as_ref().filter(|_| view.fasting) {
        let _ = writeln!(
            out,
            "Remaining: {} (ends {})",
            view.remaining,
            local(tz, session.end_time, DATE_TIME_FORMAT)
        );
        let _ = writeln!(out, "Progress: {:.0}%", view.progress_pct);
    }
    if !view.persistent {
        let _ = writeln!(out, "Warning: {}", NoticeKind::StorageUnavailable);
    }
    out
}

/// Remaining time and projected end for a candidate duration.
pub fn remaining<Tz: TimeZone>(preview: &RemainingPreview, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    format!(
        "Remaining: {}h {}m (ends {})",
        preview.hours,
        preview.minutes,
        local(tz, preview.end_time, TIME_FORMAT)
    )
}

/// One line per entry, newest first as the daemon sends them.
pub fn history<Tz: TimeZone>(entries: &[HistoryEntry], total: usize, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    if entries.is_empty() {
        return format!("{EMPTY_HISTORY}\n");
    }

    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "{:<10} {}",
            local(tz, entry.start_time, DATE_FORMAT),
            entry.duration_parts()
        );
    }
    if total > entries.len() {
        let _ = writeln!(out, "({} of {total} shown)", entries.len());
    }
    out
}

pub fn started<Tz: TimeZone>(
    session: &FastingSession,
    schedule: &NotificationSchedule,
    tz: &Tz,
) -> String
where
    Tz::Offset: Display,
{
    format!(
        "Fast started: {}h, ends {} (reminder at {})",
        session.target_duration_hours,
        local(tz, session.end_time, DATE_TIME_FORMAT),
        local(tz, schedule.fire_at_warning, TIME_FORMAT)
    )
}

pub fn finished(entry: &HistoryEntry, reason: FinishReason) -> String {
    let how = match reason {
        FinishReason::Manual => "stopped",
        FinishReason::Expired => "completed",
    };
    format!("Fast {how} after {}", entry.duration_parts())
}

pub fn tick(elapsed_clock: &str, remaining_ms: i64) -> String {
    format!("{elapsed_clock}  (remaining {})", format_clock(remaining_ms))
}

pub fn notice(kind: NoticeKind, message: &str) -> String {
    format!("Notice [{kind}]: {message}")
}

pub fn notification(title: &str, body: &str, actions: &[NotificationAction]) -> String {
    let mut out = format!("{title}: {body}");
    if !actions.is_empty() {
        let labels: Vec<&str> = actions.iter().map(|a| a.title.as_str()).collect();
        let _ = write!(out, " [{}]", labels.join(" | "));
    }
    out
}

fn delivery_label(delivery: &DeliveryMechanism) -> &'static str {
    match delivery {
        DeliveryMechanism::Background { .. } => "background (with actions)",
        DeliveryMechanism::InPage => "in-page",
        DeliveryMechanism::InstallGuidance => "install the app to enable notifications",
        DeliveryMechanism::Disabled => "disabled",
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Notification and storage status for `ftm doctor`.
pub fn diagnostics(report: &DiagnosticsReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Daemon version:   {}", report.daemon_version);
    let _ = writeln!(out, "Protocol:         {}", report.protocol_version);
    let _ = writeln!(out, "Platform:         {}", report.capability);
    let _ = writeln!(out, "Permission:       {:?}", report.permission);
    let _ = writeln!(out, "Delivery:         {}", delivery_label(&report.delivery));
    let _ = writeln!(out, "Relay configured: {}", yes_no(report.relay_configured));
    let _ = writeln!(out, "Push subscribed:  {}", yes_no(report.push_subscribed));
    let storage = match (&report.storage_path, report.persistent) {
        (Some(path), true) => format!("persistent ({path})"),
        (_, true) => "persistent".to_string(),
        (_, false) => "in memory only".to_string(),
    };
    let _ = writeln!(out, "Storage:          {storage}");
    let _ = writeln!(out, "Fasting:          {}", yes_no(report.fasting));
    let _ = writeln!(out, "History entries:  {}", report.history_len);
    for kind in &report.notices {
        let _ = writeln!(out, "Notice:           {kind}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ftm_core::{
        FastingDuration, NotificationPermission, PlatformCapability,
    };
    use ftm_protocol::ProtocolVersion;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 14, 6, 0, 0).unwrap()
    }

    #[test]
    fn test_idle_status_block() {
        let view = FastingView::idle(t0(), true);
        let out = status_block(&view, &Utc);
        assert_eq!(out, "NOT FASTING\n00:00:00\n");
    }

    #[test]
    fn test_fasting_status_block() {
        let session =
            FastingSession::begin(FastingDuration::from_hours(16.0).unwrap(), t0());
        let now = t0() + Duration::hours(2) + Duration::seconds(5);
        let view = FastingView::fasting(&session, now, false);
        let out = status_block(&view, &Utc);

        assert!(out.starts_with("FASTING\n02:00:05\n"));
        assert!(out.contains("Remaining: 13h 59m (ends 2026-07-14 22:00)"));
        assert!(out.contains("Warning: storage unavailable"));
    }

    #[test]
    fn test_remaining_preview() {
        let preview =
            RemainingPreview::for_duration(FastingDuration::from_hours(18.0).unwrap(), t0());
        assert_eq!(remaining(&preview, &Utc), "Remaining: 18h 0m (ends 00:00)");
    }

    #[test]
    fn test_history_lines() {
        let entries = vec![
            HistoryEntry::new(t0(), t0() + Duration::hours(16)).unwrap(),
            HistoryEntry::new(
                t0() - Duration::days(1),
                t0() - Duration::days(1) + Duration::minutes(90),
            )
            .unwrap(),
        ];
        let out = history(&entries, 7, &Utc);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.first().copied(), Some("2026-07-14 16h 0m"));
        assert_eq!(lines.get(1).copied(), Some("2026-07-13 1h 30m"));
        assert_eq!(lines.get(2).copied(), Some("(2 of 7 shown)"));
    }

    #[test]
    fn test_empty_history() {
        assert_eq!(history(&[], 0, &Utc), "No fasting records yet\n");
    }

    #[test]
    fn test_finished_and_tick() {
        let entry = HistoryEntry::new(t0(), t0() + Duration::hours(16)).unwrap();
        assert_eq!(
            finished(&entry, FinishReason::Expired),
            "Fast completed after 16h 0m"
        );
        assert_eq!(
            tick("00:00:01", 3_599_000),
            "00:00:01  (remaining 00:59:59)"
        );
    }

    #[test]
    fn test_notification_lists_actions() {
        let out = notification("Fast complete", "Well done", &NotificationAction::defaults());
        assert_eq!(out, "Fast complete: Well done [Open app | Dismiss]");
        assert_eq!(notification("Hi", "there", &[]), "Hi: there");
    }

    #[test]
    fn test_diagnostics_in_memory() {
        let report = DiagnosticsReport {
            daemon_version: "0.1.0".to_string(),
            protocol_version: ProtocolVersion::CURRENT,
            capability: PlatformCapability::BrowserTab,
            permission: NotificationPermission::Granted,
            delivery: DeliveryMechanism::InPage,
            relay_configured: false,
            push_subscribed: false,
            persistent: false,
            storage_path: None,
            fasting: false,
            history_len: 3,
            notices: vec![NoticeKind::StorageUnavailable],
        };
        let out = diagnostics(&report);
        assert!(out.contains("Delivery:         in-page"));
        assert!(out.contains("Storage:          in memory only"));
        assert!(out.contains("Notice:           storage unavailable"));
    }
}

//! Newest-first log of finished fasts.
//!
//! The log is owned by the lifecycle actor, cached in memory and written
//! through to the store on every append.

use ftm_core::HistoryEntry;
use ftm_protocol::parse_history;
use tracing::{debug, info, warn};

use crate::store::{SharedStore, StoreError, FASTING_HISTORY_KEY};

pub const DEFAULT_RETENTION: usize = 1_000;

pub struct HistoryLog {
    store: SharedStore,
    retention: usize,
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    /// Loads the stored list. Unreadable or corrupt data starts an empty log.
    pub async fn load(store: SharedStore, retention: usize) -> Self {
        let retention = retention.max(1);
        let entries = match store.get_item(FASTING_HISTORY_KEY).await {
            Ok(None) => Vec::new(),
            Ok(Some(json)) => match parse_history(&json) {
                Ok(parsed) => {
                    if parsed.skipped > 0 {
                        warn!(skipped = parsed.skipped, "Dropped unreadable history entries");
                    }
                    let mut entries = Vec::with_capacity(parsed.entries.len());
                    for entry in parsed.entries {
                        insert_ordered(&mut entries, entry);
                    }
                    entries
                }
                Err(e) => {
                    warn!(error = %e, "Stored history is corrupt, starting with an empty log");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to read history, starting with an empty log");
                Vec::new()
            }
        };

        let mut log = Self {
            store,
            retention,
            entries,
        };
        log.apply_retention();
        debug!(entries = log.entries.len(), "History loaded");
        log
    }

    /// Records a finished fast and persists the list.
    ///
    /// The in-memory log is updated even when the write fails.
    pub async fn append(&mut self, entry: HistoryEntry) -> Result<(), StoreError> {
        info!(
            start = %entry.start_time,
            end = %entry.end_time,
            duration_ms = entry.duration_ms,
            "Recording finished fast"
        );
        insert_ordered(&mut self.entries, entry);
        self.apply_retention();
        self.persist().await
    }

    /// The first `n` entries, newest first.
    pub fn recent(&self, n: usize) -> &[HistoryEntry] {
        let end = n.min(self.entries.len());
        self.entries.get(..end).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string(&self.entries).map_err(|e| StoreError::Write {
            key: FASTING_HISTORY_KEY.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set_item(FASTING_HISTORY_KEY, &json).await
    }

    fn apply_retention(&mut self) {
        if self.entries.len() > self.retention {
            let dropped = self.entries.len() - self.retention;
            self.entries.truncate(self.retention);
            debug!(dropped, retention = self.retention, "Trimmed oldest history entries");
        }
    }
}

/// Inserts before the first entry that started no later than `entry`,
/// keeping the list non-increasing by start time.
pub fn insert_ordered(entries: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    let pos = entries
        .iter()
        .position(|e| e.start_time <= entry.start_time)
        .unwrap_or(entries.len());
    entries.insert(pos, entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn entry(start: i64, len: i64) -> HistoryEntry {
        HistoryEntry::new(at(start), at(start + len)).unwrap()
    }

    fn is_non_increasing(entries: &[HistoryEntry]) -> bool {
        entries.windows(2).all(|w| match w {
            [a, b] => a.start_time >= b.start_time,
            _ => true,
        })
    }

    #[test]
    fn test_insert_ordered_prepends_newest() {
        let mut entries = Vec::new();
        insert_ordered(&mut entries, entry(0, 16));
        insert_ordered(&mut entries, entry(24, 16));
        assert_eq!(entries.first().map(|e| e.start_time), Some(at(24)));
    }

    #[test]
    fn test_insert_ordered_out_of_order_entry() {
        let mut entries = vec![entry(48, 16), entry(0, 16)];
        insert_ordered(&mut entries, entry(24, 16));
        assert!(is_non_increasing(&entries));
        assert_eq!(entries.get(1).map(|e| e.start_time), Some(at(24)));
    }

    #[tokio::test]
    async fn test_append_persists_and_orders() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let mut log = HistoryLog::load(Arc::clone(&store), DEFAULT_RETENTION).await;
        assert!(log.is_empty());

        log.append(entry(0, 16)).await.unwrap();
        log.append(entry(24, 18)).await.unwrap();
        log.append(entry(48, 20)).await.unwrap();

        assert!(is_non_increasing(log.recent(10)));
        assert_eq!(log.recent(2).len(), 2);
        assert_eq!(log.recent(0).len(), 0);

        let reloaded = HistoryLog::load(store, DEFAULT_RETENTION).await;
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.recent(1).first().map(|e| e.start_time), Some(at(48)));
    }

    #[tokio::test]
    async fn test_retention_drops_oldest() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let mut log = HistoryLog::load(store, 2).await;
        for day in 0..4 {
            log.append(entry(day * 24, 16)).await.unwrap();
        }
        assert_eq!(log.len(), 2);
        let starts: Vec<_> = log.recent(5).iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![at(72), at(48)]);
    }

    #[tokio::test]
    async fn test_duplicates_are_kept() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let mut log = HistoryLog::load(store, DEFAULT_RETENTION).await;
        log.append(entry(0, 16)).await.unwrap();
        log.append(entry(0, 16)).await.unwrap();
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_history_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_item(FASTING_HISTORY_KEY, "{ definitely not a list")
            .await
            .unwrap();
        let log = HistoryLog::load(store, DEFAULT_RETENTION).await;
        assert!(log.is_empty());
    }
}

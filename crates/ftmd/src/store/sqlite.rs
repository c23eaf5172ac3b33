use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{KeyValueStore, StoreError};

/// SQLite-backed store with a single `kv` table.
///
/// The connection is opened by [`init`](KeyValueStore::init) and every call
/// runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            match guard.as_ref() {
                Some(conn) => f(conn),
                None => Err(StoreError::Uninitialized),
            }
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let unavailable = |reason: String| StoreError::Unavailable {
        location: path.display().to_string(),
        reason,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }
    }

    let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;

    if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!(error = %e, "Failed to enable WAL journal, continuing with default");
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );",
    )
    .map_err(|e| unavailable(e.to_string()))?;

    Ok(conn)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn init(&self) -> Result<(), StoreError> {
        let path = self.path.clone();
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            if guard.is_none() {
                *guard = Some(open_connection(&path)?);
                debug!(path = %path.display(), "SQLite store initialized");
            }
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            );
            result.map(|_| ()).map_err(|e| StoreError::Write {
                key,
                reason: e.to_string(),
            })
        })
        .await
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let result = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional();
            result.map_err(|e| StoreError::Read {
                key,
                reason: e.to_string(),
            })
        })
        .await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let result = conn.execute("DELETE FROM kv WHERE key = ?1", params![key]);
            result.map(|_| ()).map_err(|e| StoreError::Write {
                key,
                reason: e.to_string(),
            })
        })
        .await
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn location(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("ftm.db"));
        store.init().await.unwrap();
        store.init().await.unwrap();

        assert_eq!(store.get_item("currentFasting").await.unwrap(), None);
        store.set_item("currentFasting", "{\"a\":1}").await.unwrap();
        store.set_item("currentFasting", "{\"a\":2}").await.unwrap();
        assert_eq!(
            store.get_item("currentFasting").await.unwrap().as_deref(),
            Some("{\"a\":2}")
        );
        store.remove_item("currentFasting").await.unwrap();
        store.remove_item("currentFasting").await.unwrap();
        assert_eq!(store.get_item("currentFasting").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ftm.db");
        {
            let store = SqliteStore::new(&path);
            store.init().await.unwrap();
            store.set_item("fastingHistory", "[]").await.unwrap();
        }
        let reopened = SqliteStore::new(&path);
        reopened.init().await.unwrap();
        assert_eq!(
            reopened.get_item("fastingHistory").await.unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn test_use_before_init() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("ftm.db"));
        assert_eq!(
            store.get_item("k").await.unwrap_err(),
            StoreError::Uninitialized
        );
    }
}

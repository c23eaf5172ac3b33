//! Durable key-value storage for the running fast and its history.
//!
//! Values are JSON strings under two keys, [`CURRENT_FASTING_KEY`] and
//! [`FASTING_HISTORY_KEY`]. [`SqliteStore`] is the durable backend;
//! [`MemoryStore`] backs tests and the fallback used when the database
//! cannot be opened.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// Key holding the active session record.
pub const CURRENT_FASTING_KEY: &str = "currentFasting";

/// Key holding the newest-first history array.
pub const FASTING_HISTORY_KEY: &str = "fastingHistory";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The backing database could not be opened or created.
    #[error("Storage unavailable at {location}: {reason}")]
    Unavailable { location: String, reason: String },

    #[error("Failed to write {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Failed to read {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Store used before init")]
    Uninitialized,

    #[error("Storage worker failed: {0}")]
    Worker(String),
}

/// Async key-value store.
///
/// `get_item` returns `Ok(None)` for an absent key; `remove_item` on an
/// absent key succeeds.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Opens or creates the backing storage. Idempotent.
    async fn init(&self) -> Result<(), StoreError>;

    /// Upserts a value. Resolves once the write is committed.
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// False for stores that lose their contents on exit.
    fn is_persistent(&self) -> bool;

    /// Where the data lives, for diagnostics.
    fn location(&self) -> Option<String>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Opens the SQLite store at `path`, falling back to memory.
///
/// Returns the init error alongside the fallback so the caller can raise
/// a one-time notice.
pub async fn open_store(path: &Path) -> (SharedStore, Option<StoreError>) {
    let sqlite = SqliteStore::new(path);
    match sqlite.init().await {
        Ok(()) => {
            info!(path = %path.display(), "Opened session store");
            (Arc::new(sqlite), None)
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Session store unavailable, falling back to in-memory storage"
            );
            (Arc::new(MemoryStore::new()), Some(e))
        }
    }
}

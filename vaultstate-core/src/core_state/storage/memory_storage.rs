//! Volatile storage backend
//!
//! Holds JSON values in a map and announces every committed write on a
//! broadcast feed. Backs the `memory` location and derived-state slots, and
//! doubles as the in-memory backend in tests.

use super::{StorageService, StorageUpdate, DEFAULT_UPDATE_FEED_CAPACITY};
use crate::core_state::errors::{StorageError, StorageResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

/// Helper to convert poison errors into StorageError
fn handle_poison<T>(_err: PoisonError<T>) -> StorageError {
    StorageError::Internal("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// In-memory key/value store
pub struct MemoryStorageService {
    store: RwLock<HashMap<String, Value>>,
    updates: broadcast::Sender<StorageUpdate>,
}

impl MemoryStorageService {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_UPDATE_FEED_CAPACITY)
    }

    /// Create an empty store whose feed buffers `capacity` events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        MemoryStorageService {
            store: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.store.read().map_err(handle_poison)?.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of stored keys
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.store.read().map_err(handle_poison)?.keys().cloned().collect())
    }

    fn announce(&self, update: StorageUpdate) {
        // No subscribers is fine; the feed is an event bus, not a queue.
        let _ = self.updates.send(update);
    }
}

impl Default for MemoryStorageService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageService for MemoryStorageService {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.store.read().map_err(handle_poison)?.get(key).cloned())
    }

    async fn save(&self, key: &str, value: Value) -> StorageResult<()> {
        if value.is_null() {
            return self.remove(key).await;
        }

        self.store
            .write()
            .map_err(handle_poison)?
            .insert(key.to_string(), value);
        self.announce(StorageUpdate::save(key));
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.store.write().map_err(handle_poison)?.remove(key);
        self.announce(StorageUpdate::remove(key));
        Ok(())
    }

    fn updates(&self) -> broadcast::Receiver<StorageUpdate> {
        self.updates.subscribe()
    }
}

//! Fake storage backend for tests
//!
//! Behaves like the in-memory backend, and additionally lets a test make
//! saves fail, slow saves or removes down, and count calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::core_state::errors::{StorageError, StorageResult};
use crate::core_state::storage::{MemoryStorageService, StorageService, StorageUpdate};

#[derive(Default)]
pub struct FakeStorageService {
    inner: Arc<MemoryStorageService>,
    fail_saves: AtomicBool,
    save_delay: Mutex<Duration>,
    remove_delay: Mutex<Duration>,
    get_calls: AtomicUsize,
    save_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl FakeStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following save fail with `StorageError::Unavailable`
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every save before writing
    pub fn set_save_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.save_delay.lock() {
            *current = delay;
        }
    }

    /// Hand every remove to a background task that deletes after `delay`.
    /// The removal completes even if the caller stops waiting, like a
    /// backend that queues its writes on another thread.
    pub fn set_remove_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.remove_delay.lock() {
            *current = delay;
        }
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Raw stored value, bypassing the counters
    pub async fn peek(&self, key: &str) -> Option<Value> {
        self.inner.get(key).await.ok().flatten()
    }

    fn save_delay(&self) -> Duration {
        self.save_delay.lock().map(|delay| *delay).unwrap_or_default()
    }

    fn remove_delay(&self) -> Duration {
        self.remove_delay.lock().map(|delay| *delay).unwrap_or_default()
    }
}

#[async_trait]
impl StorageService for FakeStorageService {
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn save(&self, key: &str, value: Value) -> StorageResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.save_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("save of {} rejected", key)));
        }
        self.inner.save(key, value).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.remove_delay();
        if delay.is_zero() {
            return self.inner.remove(key).await;
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.remove(&key).await
        })
        .await
        .map_err(|e| StorageError::Internal(format!("queued remove failed: {}", e)))?
    }

    fn updates(&self) -> broadcast::Receiver<StorageUpdate> {
        self.inner.updates()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_counts_calls() {
        let storage = FakeStorageService::new();
        storage.save("k", json!(1)).await.unwrap();
        storage.get("k").await.unwrap();
        storage.remove("k").await.unwrap();

        assert_eq!(storage.save_calls(), 1);
        assert_eq!(storage.get_calls(), 1);
        assert_eq!(storage.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_writes_nothing() {
        let storage = FakeStorageService::new();
        storage.fail_saves(true);

        let result = storage.save("k", json!(1)).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(storage.peek("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_delay() {
        let storage = FakeStorageService::new();
        storage.set_save_delay(Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        storage.save("k", json!(1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_remove_outlives_caller() {
        let storage = FakeStorageService::new();
        storage.save("k", json!(1)).await.unwrap();
        storage.set_remove_delay(Duration::from_millis(50));

        let abandoned = tokio::time::timeout(Duration::from_millis(10), storage.remove("k")).await;
        assert!(abandoned.is_err());
        assert_eq!(storage.peek("k").await, Some(json!(1)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(storage.peek("k").await, None);
    }
}

/*
    Storage subsystem - contract consumed from the platform

    The state layer never touches bytes itself. It talks to three
    interchangeable backends (disk, memory, secure) through the
    StorageService trait:
    - get resolves None for missing keys and never fails because of absence
    - save(key, null) is remove(key)
    - every committed write is announced on the update feed afterwards
*/

pub mod memory_storage;

pub use memory_storage::MemoryStorageService;

use crate::config::StorageConfig;
use crate::core_state::definition::StorageLocation;
use crate::core_state::errors::StorageResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default capacity of a backend's update feed
pub const DEFAULT_UPDATE_FEED_CAPACITY: usize = 256;

/// Kind of write a feed event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageUpdateType {
    Save,
    Remove,
}

/// One committed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUpdate {
    pub key: String,
    pub update_type: StorageUpdateType,
}

impl StorageUpdate {
    pub fn save(key: impl Into<String>) -> Self {
        StorageUpdate {
            key: key.into(),
            update_type: StorageUpdateType::Save,
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        StorageUpdate {
            key: key.into(),
            update_type: StorageUpdateType::Remove,
        }
    }
}

/// Key/value backend with a change feed
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Read a key; `None` when absent
    async fn get(&self, key: &str) -> StorageResult<Option<Value>>;

    /// Whether a key holds a value
    async fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Write a key. Writing JSON null removes it.
    async fn save(&self, key: &str, value: Value) -> StorageResult<()>;

    /// Delete a key
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Subscribe to committed writes
    fn updates(&self) -> broadcast::Receiver<StorageUpdate>;
}

/// Routes a storage location to its backend
#[derive(Clone)]
pub struct StorageServiceProvider {
    disk: Arc<dyn StorageService>,
    memory: Arc<dyn StorageService>,
    secure: Arc<dyn StorageService>,
}

impl StorageServiceProvider {
    pub fn new(
        disk: Arc<dyn StorageService>,
        memory: Arc<dyn StorageService>,
        secure: Arc<dyn StorageService>,
    ) -> Self {
        StorageServiceProvider { disk, memory, secure }
    }

    /// Three independent in-memory backends
    pub fn in_memory() -> Self {
        Self::in_memory_with_config(&StorageConfig::default())
    }

    /// Three independent in-memory backends sized from configuration
    pub fn in_memory_with_config(config: &StorageConfig) -> Self {
        let capacity = config.update_feed_capacity;
        Self::new(
            Arc::new(MemoryStorageService::with_capacity(capacity)),
            Arc::new(MemoryStorageService::with_capacity(capacity)),
            Arc::new(MemoryStorageService::with_capacity(capacity)),
        )
    }

    /// Backend for a location
    pub fn get(&self, location: StorageLocation) -> Arc<dyn StorageService> {
        match location {
            StorageLocation::Disk => Arc::clone(&self.disk),
            StorageLocation::Memory => Arc::clone(&self.memory),
            StorageLocation::Secure => Arc::clone(&self.secure),
        }
    }

    /// Volatile backend, also used for derived values
    pub fn memory(&self) -> Arc<dyn StorageService> {
        Arc::clone(&self.memory)
    }
}

impl fmt::Debug for StorageServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageServiceProvider").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_provider_routes_by_location() {
        let provider = StorageServiceProvider::in_memory();
        provider.get(StorageLocation::Disk).save("k", json!(1)).await.unwrap();

        assert!(provider.get(StorageLocation::Disk).has("k").await.unwrap());
        assert!(!provider.get(StorageLocation::Memory).has("k").await.unwrap());
        assert!(!provider.get(StorageLocation::Secure).has("k").await.unwrap());
    }

    #[test]
    fn test_storage_update_constructors() {
        assert_eq!(StorageUpdate::save("a").update_type, StorageUpdateType::Save);
        assert_eq!(StorageUpdate::remove("a").update_type, StorageUpdateType::Remove);
    }
}

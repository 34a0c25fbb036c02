//! Global state: one value per key for the whole process

use std::fmt;
use std::sync::Arc;

use crate::config::StateConfig;
use crate::core_state::definition::{KeyDefinition, StateValue, StorageKey};
use crate::core_state::errors::StateResult;
use crate::core_state::state::base::StateBase;
use crate::core_state::storage::StorageService;
use crate::core_state::stream::{StateSource, StateStream};
use crate::core_state::update_options::UpdateOptions;

/// Handle on a key shared by every account
///
/// Obtain handles through `GlobalStateProvider` so that every call site for
/// the same key shares one update queue.
pub struct GlobalState<T> {
    base: StateBase<T>,
}

impl<T: StateValue> GlobalState<T> {
    pub(crate) fn new(
        definition: KeyDefinition<T>,
        storage: Arc<dyn StorageService>,
        settings: StateConfig,
    ) -> Self {
        let key = StorageKey::global(&definition);
        GlobalState {
            base: StateBase::new(key, storage, definition, settings),
        }
    }

    /// Stream of the stored value. Nothing is emitted until the first
    /// backend read resolves.
    pub fn state(&self) -> StateStream<T> {
        self.base.subscribe()
    }

    /// Replace the value with `configure(current)`
    pub async fn update<F>(&self, configure: F) -> StateResult<T>
    where
        F: FnOnce(T) -> T + Send,
    {
        self.base
            .update_with(|current, _: Option<()>| configure(current), UpdateOptions::new())
            .await
    }

    /// Update with a gate, a dependency stream and a dependency timeout
    pub async fn update_with<D, F>(&self, configure: F, options: UpdateOptions<T, D>) -> StateResult<T>
    where
        D: Clone + Send + Sync + 'static,
        F: FnOnce(T, Option<D>) -> T + Send,
    {
        self.base.update_with(configure, options).await
    }

    /// Read the backend once, bypassing the stream
    pub async fn get_from_state(&self) -> StateResult<T> {
        self.base.get_from_state().await
    }

    pub fn key_definition(&self) -> &KeyDefinition<T> {
        self.base.definition()
    }

    pub fn storage_key(&self) -> &StorageKey {
        self.base.key()
    }
}

impl<T: StateValue> StateSource<T> for GlobalState<T> {
    fn subscribe(&self) -> StateStream<T> {
        self.state()
    }
}

impl<T: StateValue> fmt::Debug for GlobalState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalState").field("key", self.base.key()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::definition::state_definitions::VAULT_SETTINGS_DISK;
    use crate::core_state::storage::MemoryStorageService;
    use serde_json::json;

    fn theme_key() -> KeyDefinition<String> {
        KeyDefinition::new(VAULT_SETTINGS_DISK, "theme", "system".to_string())
    }

    #[tokio::test]
    async fn test_storage_key_excludes_user() {
        let state = GlobalState::new(theme_key(), Arc::new(MemoryStorageService::new()), StateConfig::default());
        assert_eq!(state.storage_key().as_str(), "global_vaultSettings_theme");
    }

    #[tokio::test]
    async fn test_update_then_get_from_state() {
        let storage = Arc::new(MemoryStorageService::new());
        let state = GlobalState::new(theme_key(), storage.clone(), StateConfig::default());

        state.update(|_| "dark".to_string()).await.unwrap();
        assert_eq!(state.get_from_state().await.unwrap(), "dark");
        assert_eq!(
            storage.get("global_vaultSettings_theme").await.unwrap(),
            Some(json!("dark"))
        );
    }

    #[tokio::test]
    async fn test_null_in_storage_reads_as_initial() {
        let storage = Arc::new(MemoryStorageService::new());
        let state = GlobalState::new(theme_key(), storage, StateConfig::default());
        assert_eq!(state.state().next().await.as_deref(), Some("system"));
    }
}

//! Global state provider

use std::fmt;
use std::sync::Arc;

use crate::config::StateConfig;
use crate::core_state::definition::{KeyDefinition, StateValue};
use crate::core_state::errors::StateResult;
use crate::core_state::provider::HandleCache;
use crate::core_state::state::GlobalState;
use crate::core_state::storage::StorageServiceProvider;

/// Hands out one `GlobalState` per key definition cache key
pub struct GlobalStateProvider {
    storage: StorageServiceProvider,
    settings: StateConfig,
    cache: HandleCache<String>,
}

impl GlobalStateProvider {
    pub fn new(storage: StorageServiceProvider, settings: StateConfig) -> Self {
        GlobalStateProvider {
            storage,
            settings,
            cache: HandleCache::new(),
        }
    }

    pub fn get<T: StateValue>(&self, definition: &KeyDefinition<T>) -> StateResult<Arc<GlobalState<T>>> {
        self.cache.get_or_create(definition.build_cache_key(), || {
            Ok(GlobalState::new(
                definition.clone(),
                self.storage.get(definition.storage_location()),
                self.settings.clone(),
            ))
        })
    }
}

impl fmt::Debug for GlobalStateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalStateProvider")
            .field("handles", &self.cache.len().ok())
            .finish()
    }
}

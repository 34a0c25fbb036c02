//! Derived state provider

use std::fmt;
use std::sync::Arc;

use crate::config::DerivedConfig;
use crate::core_state::definition::{DeriveDefinition, StateValue};
use crate::core_state::errors::StateResult;
use crate::core_state::provider::HandleCache;
use crate::core_state::state::DerivedState;
use crate::core_state::storage::StorageService;
use crate::core_state::stream::StateSource;

/// Hands out one `DerivedState` per derive definition
///
/// The cache is keyed by the definition alone: the first caller's parent
/// and dependencies are the ones the handle keeps.
pub struct DerivedStateProvider {
    memory: Arc<dyn StorageService>,
    settings: DerivedConfig,
    cache: HandleCache<String>,
}

impl DerivedStateProvider {
    pub fn new(memory: Arc<dyn StorageService>, settings: DerivedConfig) -> Self {
        DerivedStateProvider {
            memory,
            settings,
            cache: HandleCache::new(),
        }
    }

    pub fn get<TFrom, TTo, D>(
        &self,
        parent: Arc<dyn StateSource<TFrom>>,
        definition: &DeriveDefinition<TFrom, TTo, D>,
        dependencies: D,
    ) -> StateResult<Arc<DerivedState<TFrom, TTo, D>>>
    where
        TFrom: StateValue,
        TTo: StateValue,
        D: Clone + Send + Sync + 'static,
    {
        self.cache.get_or_create(definition.build_cache_key(), || {
            Ok(DerivedState::new(
                parent,
                definition.clone(),
                dependencies,
                Arc::clone(&self.memory),
                self.settings.cleanup_delay,
            ))
        })
    }
}

impl fmt::Debug for DerivedStateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedStateProvider")
            .field("cleanup_delay", &self.settings.cleanup_delay)
            .field("handles", &self.cache.len().ok())
            .finish()
    }
}

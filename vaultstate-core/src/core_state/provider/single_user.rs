//! Single-user state provider

use std::fmt;
use std::sync::Arc;

use crate::config::StateConfig;
use crate::core_account::UserId;
use crate::core_state::definition::{KeyDefinition, StateValue};
use crate::core_state::errors::StateResult;
use crate::core_state::events::StateEventRegistry;
use crate::core_state::provider::{HandleCache, UserCacheKey};
use crate::core_state::state::SingleUserState;
use crate::core_state::storage::StorageServiceProvider;

/// Hands out one `SingleUserState` per (key, account)
///
/// New handles register their definition's clear events so that a lock or
/// logout can find the slot later.
pub struct SingleUserStateProvider {
    storage: StorageServiceProvider,
    settings: StateConfig,
    registry: Arc<StateEventRegistry>,
    cache: HandleCache<UserCacheKey>,
}

impl SingleUserStateProvider {
    pub fn new(
        storage: StorageServiceProvider,
        settings: StateConfig,
        registry: Arc<StateEventRegistry>,
    ) -> Self {
        SingleUserStateProvider {
            storage,
            settings,
            registry,
            cache: HandleCache::new(),
        }
    }

    pub fn get<T: StateValue>(
        &self,
        user_id: &UserId,
        definition: &KeyDefinition<T>,
    ) -> StateResult<Arc<SingleUserState<T>>> {
        let key = UserCacheKey::new(definition.build_cache_key(), user_id);
        self.cache.get_or_create(key, || {
            self.registry.register(definition)?;
            Ok(SingleUserState::new(
                user_id.clone(),
                definition.clone(),
                self.storage.get(definition.storage_location()),
                self.settings.clone(),
            ))
        })
    }
}

impl fmt::Debug for SingleUserStateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleUserStateProvider")
            .field("handles", &self.cache.len().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::definition::state_definitions::{MASTER_PASSWORD_MEMORY, POLICIES_DISK};
    use crate::core_state::events::ClearEvent;

    fn provider() -> (SingleUserStateProvider, Arc<StateEventRegistry>) {
        let registry = Arc::new(StateEventRegistry::new());
        let provider = SingleUserStateProvider::new(
            StorageServiceProvider::in_memory(),
            StateConfig::default(),
            Arc::clone(&registry),
        );
        (provider, registry)
    }

    #[tokio::test]
    async fn test_cache_includes_user_id() {
        let (provider, _) = provider();
        let definition = KeyDefinition::new(POLICIES_DISK, "policies", Vec::<String>::new());
        let alice = UserId::new("alice");

        let a1 = provider.get(&alice, &definition).unwrap();
        let a2 = provider.get(&alice, &definition).unwrap();
        let b = provider.get(&UserId::new("bob"), &definition).unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[tokio::test]
    async fn test_registers_clear_events() {
        let (provider, registry) = provider();
        let definition = KeyDefinition::new(MASTER_PASSWORD_MEMORY, "masterKey", Option::<String>::None)
            .with_clear_on([ClearEvent::Lock, ClearEvent::Logout]);

        provider.get(&UserId::new("alice"), &definition).unwrap();

        let on_lock = registry.registered(ClearEvent::Lock).unwrap();
        assert_eq!(on_lock.len(), 1);
        assert_eq!(on_lock[0].key, "masterKey");
    }
}

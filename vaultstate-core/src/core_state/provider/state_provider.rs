//! StateProvider - the single entry point for state handles
//!
//! Construct one per process and share it. Every `get_*` call for the same
//! coordinates returns the same handle, so all callers of a key share one
//! update queue. The backend is picked from the key's storage location.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::Config;
use crate::core_account::{AccountService, DefaultAccountService, UserId};
use crate::core_rollover::{RolloverKeyDefinition, RolloverState};
use crate::core_state::definition::{DeriveDefinition, KeyDefinition, StateValue, StorageKey};
use crate::core_state::errors::StateResult;
use crate::core_state::events::{ClearEvent, StateEventRegistry};
use crate::core_state::provider::{
    ActiveUserStateProvider, DerivedStateProvider, GlobalStateProvider, HandleCache,
    SingleUserStateProvider, UserCacheKey,
};
use crate::core_state::state::{ActiveUserState, DerivedState, GlobalState, SingleUserState};
use crate::core_state::storage::StorageServiceProvider;
use crate::core_state::stream::{StateSource, StateSubject};

pub struct StateProvider {
    storage: StorageServiceProvider,
    registry: Arc<StateEventRegistry>,
    global: Arc<GlobalStateProvider>,
    single_user: Arc<SingleUserStateProvider>,
    active_user: ActiveUserStateProvider,
    derived: DerivedStateProvider,
    drain_locks: HandleCache<UserCacheKey>,
}

impl StateProvider {
    /// Compose providers around an existing global provider and account
    /// service
    pub fn new(
        storage: StorageServiceProvider,
        global: Arc<GlobalStateProvider>,
        accounts: Arc<dyn AccountService>,
        config: &Config,
    ) -> Self {
        let registry = Arc::new(StateEventRegistry::new());
        let single_user = Arc::new(SingleUserStateProvider::new(
            storage.clone(),
            config.state.clone(),
            Arc::clone(&registry),
        ));
        let active_user = ActiveUserStateProvider::new(accounts, Arc::clone(&single_user));
        let derived = DerivedStateProvider::new(storage.memory(), config.derived.clone());

        StateProvider {
            storage,
            registry,
            global,
            single_user,
            active_user,
            derived,
            drain_locks: HandleCache::new(),
        }
    }

    /// Provider whose accounts live in global state
    ///
    /// Returns the account service alongside so callers can sign users in
    /// and switch between them.
    pub fn with_default_accounts(
        storage: StorageServiceProvider,
        config: &Config,
    ) -> StateResult<(Self, Arc<DefaultAccountService>)> {
        let global = Arc::new(GlobalStateProvider::new(storage.clone(), config.state.clone()));
        let accounts = Arc::new(DefaultAccountService::new(&global)?);
        let provider = Self::new(storage, global, Arc::clone(&accounts) as Arc<dyn AccountService>, config);
        info!("state provider ready");
        Ok((provider, accounts))
    }

    pub fn get_global<T: StateValue>(&self, definition: &KeyDefinition<T>) -> StateResult<Arc<GlobalState<T>>> {
        self.global.get(definition)
    }

    pub fn get_user<T: StateValue>(
        &self,
        user_id: &UserId,
        definition: &KeyDefinition<T>,
    ) -> StateResult<Arc<SingleUserState<T>>> {
        self.single_user.get(user_id, definition)
    }

    pub fn get_active<T: StateValue>(&self, definition: &KeyDefinition<T>) -> StateResult<Arc<ActiveUserState<T>>> {
        self.active_user.get(definition)
    }

    pub fn get_derived<TFrom, TTo, D>(
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
        self.derived.get(parent, definition, dependencies)
    }

    /// Rollover state that drains as soon as something is staged
    pub fn get_rollover<I, O>(
        &self,
        user_id: &UserId,
        definition: &RolloverKeyDefinition<I, O, ()>,
        output: &KeyDefinition<O>,
    ) -> StateResult<RolloverState<I, O, ()>>
    where
        I: StateValue,
        O: StateValue,
    {
        self.get_rollover_with(user_id, definition, output, Arc::new(StateSubject::new(())))
    }

    /// Rollover state gated by a dependency stream
    pub fn get_rollover_with<I, O, D>(
        &self,
        user_id: &UserId,
        definition: &RolloverKeyDefinition<I, O, D>,
        output: &KeyDefinition<O>,
        dependency: Arc<dyn StateSource<D>>,
    ) -> StateResult<RolloverState<I, O, D>>
    where
        I: StateValue,
        O: StateValue,
        D: Clone + Send + Sync + 'static,
    {
        let input_definition = definition.to_key_definition();
        let input = self.single_user.get(user_id, &input_definition)?;
        let output = self.single_user.get(user_id, output)?;
        let drain_lock = self.drain_locks.get_or_create(
            UserCacheKey::new(input_definition.build_cache_key(), user_id),
            || Ok(Mutex::new(())),
        )?;

        Ok(RolloverState::new(definition.clone(), input, output, dependency, drain_lock))
    }

    /// Write a user's slot without going through the active user
    pub async fn set_user_state<T: StateValue>(
        &self,
        user_id: &UserId,
        definition: &KeyDefinition<T>,
        value: T,
    ) -> StateResult<T> {
        self.get_user(user_id, definition)?.update(move |_| value).await
    }

    /// Snapshot of the signed-in account's id
    pub fn active_user_id(&self) -> Option<UserId> {
        self.active_user.active_user_id()
    }

    /// Remove every slot registered for `event` that belongs to `user_id`
    ///
    /// Open handles observe the removals through the update feed and fall
    /// back to their initial values.
    pub async fn handle_event(&self, event: ClearEvent, user_id: &UserId) -> StateResult<()> {
        let registered = self.registry.registered(event)?;
        debug!(%event, user = %user_id, keys = registered.len(), "clearing user state");

        for entry in registered {
            let key = StorageKey::for_user(user_id, &entry.state_definition, &entry.key);
            self.storage
                .get(entry.state_definition.storage_location())
                .remove(key.as_str())
                .await?;
        }
        Ok(())
    }
}

impl fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateProvider")
            .field("storage", &self.storage)
            .field("global", &self.global)
            .field("single_user", &self.single_user)
            .field("active_user", &self.active_user)
            .field("derived", &self.derived)
            .finish()
    }
}

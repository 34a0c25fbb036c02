//! Single-user state: one account's slot for a key
//!
//! The account does not have to be the active one. Handles are what the
//! active-user state delegates to, so the active handle and a direct handle
//! for the same account share one update queue.

use std::fmt;
use std::sync::Arc;

use crate::config::StateConfig;
use crate::core_account::UserId;
use crate::core_state::definition::{KeyDefinition, StateValue, StorageKey};
use crate::core_state::errors::StateResult;
use crate::core_state::state::base::StateBase;
use crate::core_state::storage::StorageService;
use crate::core_state::stream::{StateSource, StateStream};
use crate::core_state::update_options::UpdateOptions;

pub struct SingleUserState<T> {
    user_id: UserId,
    base: StateBase<T>,
}

impl<T: StateValue> SingleUserState<T> {
    pub(crate) fn new(
        user_id: UserId,
        definition: KeyDefinition<T>,
        storage: Arc<dyn StorageService>,
        settings: StateConfig,
    ) -> Self {
        let key = StorageKey::user(&user_id, &definition);
        SingleUserState {
            user_id,
            base: StateBase::new(key, storage, definition, settings),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn state(&self) -> StateStream<T> {
        self.base.subscribe()
    }

    /// Stream of `(user_id, value)` pairs
    pub fn combined_state(&self) -> StateStream<(UserId, T)> {
        let user_id = self.user_id.clone();
        self.state().map(move |value| (user_id.clone(), value))
    }

    pub async fn update<F>(&self, configure: F) -> StateResult<T>
    where
        F: FnOnce(T) -> T + Send,
    {
        self.base
            .update_with(|current, _: Option<()>| configure(current), UpdateOptions::new())
            .await
    }

    pub async fn update_with<D, F>(&self, configure: F, options: UpdateOptions<T, D>) -> StateResult<T>
    where
        D: Clone + Send + Sync + 'static,
        F: FnOnce(T, Option<D>) -> T + Send,
    {
        self.base.update_with(configure, options).await
    }

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

impl<T: StateValue> StateSource<T> for SingleUserState<T> {
    fn subscribe(&self) -> StateStream<T> {
        self.state()
    }
}

impl<T: StateValue> fmt::Debug for SingleUserState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleUserState")
            .field("user_id", &self.user_id)
            .field("key", self.base.key())
            .finish()
    }
}

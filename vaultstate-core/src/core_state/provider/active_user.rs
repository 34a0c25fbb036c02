//! Active-user state provider

use std::fmt;
use std::sync::Arc;

use crate::core_account::{AccountService, UserId};
use crate::core_state::definition::{KeyDefinition, StateValue};
use crate::core_state::errors::StateResult;
use crate::core_state::provider::{HandleCache, SingleUserStateProvider};
use crate::core_state::state::ActiveUserState;

/// Hands out one `ActiveUserState` per key definition
pub struct ActiveUserStateProvider {
    accounts: Arc<dyn AccountService>,
    users: Arc<SingleUserStateProvider>,
    cache: HandleCache<String>,
}

impl ActiveUserStateProvider {
    pub fn new(accounts: Arc<dyn AccountService>, users: Arc<SingleUserStateProvider>) -> Self {
        ActiveUserStateProvider {
            accounts,
            users,
            cache: HandleCache::new(),
        }
    }

    pub fn get<T: StateValue>(&self, definition: &KeyDefinition<T>) -> StateResult<Arc<ActiveUserState<T>>> {
        self.cache.get_or_create(definition.build_cache_key(), || {
            Ok(ActiveUserState::new(
                definition.clone(),
                self.accounts.active_account(),
                Arc::clone(&self.users),
            ))
        })
    }

    /// Snapshot of the active account's id
    pub fn active_user_id(&self) -> Option<UserId> {
        self.accounts
            .active_account()
            .borrow()
            .as_ref()
            .map(|account| account.id.clone())
    }
}

impl fmt::Debug for ActiveUserStateProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveUserStateProvider")
            .field("active_user", &self.active_user_id())
            .field("handles", &self.cache.len().ok())
            .finish()
    }
}

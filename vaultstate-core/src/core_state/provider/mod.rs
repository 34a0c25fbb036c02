/*
    Provider subsystem - owns every state handle

    Each provider keeps one handle per coordinate set so that all call sites
    for the same physical key share one update queue. Handles of different
    value types live in the same map behind `dyn Any`; asking for a cached
    handle with another value type is a TypeMismatch error.
*/

pub mod active_user;
pub mod derived;
pub mod global;
pub mod single_user;
pub mod state_provider;

pub use active_user::ActiveUserStateProvider;
pub use derived::DerivedStateProvider;
pub use global::GlobalStateProvider;
pub use single_user::SingleUserStateProvider;
pub use state_provider::StateProvider;

use crate::core_account::UserId;
use crate::core_state::errors::{handle_poison, StateError, StateResult};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Cache key for handles scoped to one account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct UserCacheKey {
    pub(crate) cache_key: String,
    pub(crate) user_id: UserId,
}

impl UserCacheKey {
    pub(crate) fn new(cache_key: String, user_id: &UserId) -> Self {
        UserCacheKey {
            cache_key,
            user_id: user_id.clone(),
        }
    }
}

impl fmt::Display for UserCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.cache_key, self.user_id)
    }
}

/// Type-erased singleton map
pub(crate) struct HandleCache<K> {
    handles: Mutex<HashMap<K, Arc<dyn Any + Send + Sync>>>,
}

impl<K: Eq + Hash + fmt::Display> HandleCache<K> {
    pub(crate) fn new() -> Self {
        HandleCache {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Cached handle for `key`, creating it with `create` on first use
    pub(crate) fn get_or_create<H, F>(&self, key: K, create: F) -> StateResult<Arc<H>>
    where
        H: Any + Send + Sync,
        F: FnOnce() -> StateResult<H>,
    {
        let mut handles = self.handles.lock().map_err(handle_poison)?;
        if let Some(existing) = handles.get(&key) {
            return Arc::clone(existing)
                .downcast::<H>()
                .map_err(|_| StateError::TypeMismatch {
                    cache_key: key.to_string(),
                });
        }

        let handle = Arc::new(create()?);
        handles.insert(key, Arc::clone(&handle) as Arc<dyn Any + Send + Sync>);
        Ok(handle)
    }

    pub(crate) fn len(&self) -> StateResult<usize> {
        Ok(self.handles.lock().map_err(handle_poison)?.len())
    }
}

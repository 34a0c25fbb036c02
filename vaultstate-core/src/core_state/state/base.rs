//! Shared machinery behind global and single-user state handles
//!
//! A `StateBase` owns one physical storage key. It keeps the last known value
//! in a [`StateCell`], refreshes it from the backend's update feed on a
//! background task, and runs updates one at a time behind a FIFO mutex. The
//! backend stays the source of truth; the cell is only a read cache.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::config::StateConfig;
use crate::core_state::definition::{KeyDefinition, StateValue, StorageKey};
use crate::core_state::errors::{StateError, StateResult};
use crate::core_state::storage::{StorageService, StorageUpdate, StorageUpdateType};
use crate::core_state::stream::{StateCell, StateStream};
use crate::core_state::update_options::UpdateOptions;

pub(crate) struct StateBase<T> {
    key: StorageKey,
    storage: Arc<dyn StorageService>,
    definition: KeyDefinition<T>,
    settings: StateConfig,
    state: Arc<StateCell<T>>,
    update_lock: Arc<Mutex<()>>,
    // Dropping the sender stops the refresh task
    _shutdown: oneshot::Sender<()>,
}

impl<T: StateValue> StateBase<T> {
    /// Create the handle and start seeding it. Must run inside a Tokio runtime.
    pub(crate) fn new(
        key: StorageKey,
        storage: Arc<dyn StorageService>,
        definition: KeyDefinition<T>,
        settings: StateConfig,
    ) -> Self {
        let state = Arc::new(StateCell::new(None));
        let update_lock = Arc::new(Mutex::new(()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // Subscribe before the seeding read so no write can slip between them
        let updates = storage.updates();

        tokio::spawn(refresh_loop(
            key.clone(),
            Arc::clone(&storage),
            definition.clone(),
            Arc::clone(&state),
            Arc::clone(&update_lock),
            updates,
            shutdown_rx,
        ));

        StateBase {
            key,
            storage,
            definition,
            settings,
            state,
            update_lock,
            _shutdown: shutdown_tx,
        }
    }

    pub(crate) fn key(&self) -> &StorageKey {
        &self.key
    }

    pub(crate) fn definition(&self) -> &KeyDefinition<T> {
        &self.definition
    }

    pub(crate) fn subscribe(&self) -> StateStream<T> {
        self.state.subscribe()
    }

    /// One direct read from the backend
    pub(crate) async fn get_from_state(&self) -> StateResult<T> {
        read_state(self.storage.as_ref(), &self.key, &self.definition).await
    }

    pub(crate) async fn update_with<D, F>(
        &self,
        configure: F,
        options: UpdateOptions<T, D>,
    ) -> StateResult<T>
    where
        D: Clone + Send + Sync + 'static,
        F: FnOnce(T, Option<D>) -> T + Send,
    {
        let _guard = self.update_lock.lock().await;
        let UpdateOptions {
            should_update,
            combine_latest_with,
            timeout,
        } = options;

        let current = self.get_from_state().await?;

        let dependency = match combine_latest_with {
            Some(mut dependency) => {
                let wait = timeout.unwrap_or(self.settings.update_timeout);
                match tokio::time::timeout(wait, dependency.next()).await {
                    Ok(Some(value)) => Some(value),
                    Ok(None) => {
                        return Err(StateError::DependencyClosed {
                            key: self.key.to_string(),
                        })
                    }
                    Err(_) => {
                        return Err(StateError::DependencyTimeout {
                            key: self.key.to_string(),
                            timeout: wait,
                        })
                    }
                }
            }
            None => None,
        };

        if let Some(should_update) = should_update {
            if !should_update(&current, dependency.as_ref()) {
                debug!(key = %self.key, "update skipped by should_update");
                return Ok(current);
            }
        }

        let current_json = self
            .settings
            .warn_on_redundant_update
            .then(|| serde_json::to_value(&current).ok())
            .flatten();

        let next = configure(current, dependency);
        let json = serde_json::to_value(&next).map_err(|source| StateError::Serialization {
            key: self.key.to_string(),
            source,
        })?;

        if current_json.as_ref() == Some(&json) {
            warn!(
                key = %self.key,
                "update wrote a value equal to the current one; consider a should_update guard"
            );
        }

        self.storage.save(self.key.as_str(), json).await?;
        debug!(key = %self.key, "state updated");

        self.state.publish(next.clone());
        Ok(next)
    }
}

pub(crate) async fn read_state<T: StateValue>(
    storage: &dyn StorageService,
    key: &StorageKey,
    definition: &KeyDefinition<T>,
) -> StateResult<T> {
    let stored = storage.get(key.as_str()).await?;
    definition
        .deserialize(stored)
        .map_err(|source| StateError::deserialization(key.as_str(), source))
}

/// Replace the cached value unless it serializes identically
pub(crate) fn publish_if_changed<T: StateValue>(state: &StateCell<T>, value: T) -> bool {
    let incoming: Option<Value> = serde_json::to_value(&value).ok();
    state.publish_if(value, |current, _| match (current, incoming.as_ref()) {
        (Some(current), Some(incoming)) => serde_json::to_value(current).ok().as_ref() != Some(incoming),
        _ => true,
    })
}

async fn refresh<T: StateValue>(
    key: &StorageKey,
    storage: &dyn StorageService,
    definition: &KeyDefinition<T>,
    state: &StateCell<T>,
    update_type: StorageUpdateType,
) {
    let next = match update_type {
        StorageUpdateType::Remove => Ok(definition.initial_value()),
        StorageUpdateType::Save => read_state(storage, key, definition).await,
    };

    match next {
        Ok(value) => {
            if publish_if_changed(state, value) {
                debug!(key = %key, ?update_type, "state refreshed from storage");
            }
        }
        Err(e) => error!(key = %key, error = %e, "failed to refresh state"),
    }
}

async fn refresh_loop<T: StateValue>(
    key: StorageKey,
    storage: Arc<dyn StorageService>,
    definition: KeyDefinition<T>,
    state: Arc<StateCell<T>>,
    update_lock: Arc<Mutex<()>>,
    mut updates: broadcast::Receiver<StorageUpdate>,
    mut shutdown: oneshot::Receiver<()>,
) {
    {
        let _guard = update_lock.lock().await;
        match read_state(storage.as_ref(), &key, &definition).await {
            Ok(value) => {
                // An update may already have published this value
                publish_if_changed(&state, value);
                debug!(key = %key, "state seeded");
            }
            Err(e) => error!(key = %key, error = %e, "failed to seed state"),
        }
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            update = updates.recv() => match update {
                Ok(update) if key.matches(&update.key) => {
                    let _guard = update_lock.lock().await;
                    refresh(&key, storage.as_ref(), &definition, &state, update.update_type).await;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(key = %key, skipped, "storage update feed lagged; re-reading");
                    let _guard = update_lock.lock().await;
                    refresh(&key, storage.as_ref(), &definition, &state, StorageUpdateType::Save).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::definition::state_definitions::GENERATOR_DISK;
    use crate::core_state::storage::MemoryStorageService;
    use crate::core_state::stream::{StateSource, StateSubject};
    use serde_json::json;
    use std::time::Duration;

    fn length_key() -> KeyDefinition<u32> {
        KeyDefinition::new(GENERATOR_DISK, "passwordLength", 14)
    }

    fn base(storage: Arc<MemoryStorageService>) -> StateBase<u32> {
        let definition = length_key();
        StateBase::new(
            StorageKey::global(&definition),
            storage,
            definition,
            StateConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_seeds_from_storage() {
        let storage = Arc::new(MemoryStorageService::new());
        storage.save("global_generator_passwordLength", json!(20)).await.unwrap();

        let state = base(storage);
        let mut stream = state.subscribe();
        assert_eq!(stream.next().await, Some(20));
    }

    #[tokio::test]
    async fn test_seeds_initial_value_when_absent() {
        let state = base(Arc::new(MemoryStorageService::new()));
        assert_eq!(state.subscribe().next().await, Some(14));
    }

    #[tokio::test]
    async fn test_refreshes_on_external_write() {
        let storage = Arc::new(MemoryStorageService::new());
        let state = base(Arc::clone(&storage));
        let mut stream = state.subscribe();
        assert_eq!(stream.next().await, Some(14));

        storage.save("global_generator_passwordLength", json!(32)).await.unwrap();
        assert_eq!(stream.next().await, Some(32));

        storage.remove("global_generator_passwordLength").await.unwrap();
        assert_eq!(stream.next().await, Some(14));
    }

    #[tokio::test]
    async fn test_update_persists_and_emits() {
        let storage = Arc::new(MemoryStorageService::new());
        let state = base(Arc::clone(&storage));
        let mut stream = state.subscribe();
        assert_eq!(stream.next().await, Some(14));

        let result = state
            .update_with(|current, _: Option<()>| current + 1, UpdateOptions::new())
            .await
            .unwrap();
        assert_eq!(result, 15);
        assert_eq!(stream.next().await, Some(15));
        assert_eq!(
            storage.get("global_generator_passwordLength").await.unwrap(),
            Some(json!(15))
        );
    }

    #[tokio::test]
    async fn test_should_update_false_is_noop() {
        let storage = Arc::new(MemoryStorageService::new());
        let state = base(Arc::clone(&storage));

        let result = state
            .update_with(
                |_, _: Option<()>| 99,
                UpdateOptions::new().with_should_update(|_, _| false),
            )
            .await
            .unwrap();
        assert_eq!(result, 14);
        assert_eq!(storage.get("global_generator_passwordLength").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_timeout_leaves_storage_untouched() {
        let storage = Arc::new(MemoryStorageService::new());
        let state = base(Arc::clone(&storage));
        let subject = StateSubject::<u32>::empty();
        let dependency = subject.subscribe();

        let result = state
            .update_with(
                |_, dep| dep.unwrap_or_default(),
                UpdateOptions::new()
                    .with_combine_latest(dependency)
                    .with_timeout(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(result, Err(StateError::DependencyTimeout { .. })));
        assert_eq!(storage.get("global_generator_passwordLength").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dependency_value_reaches_configure() {
        let state = base(Arc::new(MemoryStorageService::new()));
        let result = state
            .update_with(
                |current, dep: Option<u32>| current + dep.unwrap_or_default(),
                UpdateOptions::new().with_combine_latest(StateStream::constant(6)),
            )
            .await
            .unwrap();
        assert_eq!(result, 20);
    }

    #[test]
    fn test_publish_if_changed_suppresses_equal_values() {
        let cell = StateCell::new(Some(5u32));
        assert!(!publish_if_changed(&cell, 5));
        assert!(publish_if_changed(&cell, 6));
        assert_eq!(cell.get(), Some(6));
    }

    #[tokio::test]
    async fn test_dependency_closed_leaves_storage_untouched() {
        let storage = Arc::new(MemoryStorageService::new());
        let state = base(Arc::clone(&storage));
        let subject = StateSubject::<u32>::empty();
        let dependency = subject.subscribe();
        drop(subject);

        let result = state
            .update_with(
                |_, dep| dep.unwrap_or_default(),
                UpdateOptions::new().with_combine_latest(dependency),
            )
            .await;
        assert!(matches!(result, Err(StateError::DependencyClosed { .. })));
        assert_eq!(storage.get("global_generator_passwordLength").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lagged_update_feed_settles_on_last_write() {
        let storage = Arc::new(MemoryStorageService::with_capacity(1));
        let state = base(Arc::clone(&storage));
        let mut stream = state.subscribe();
        assert_eq!(stream.next().await, Some(14));

        // No yield between writes, so the refresh task falls behind the feed
        for length in 20..=30u32 {
            storage.save("global_generator_passwordLength", json!(length)).await.unwrap();
        }

        let settled = tokio::time::timeout(Duration::from_secs(1), stream.wait_for(|v| *v == 30))
            .await
            .unwrap();
        assert_eq!(settled, Some(30));
        assert_eq!(stream.latest(), Some(30));
        assert_eq!(state.get_from_state().await.unwrap(), 30);
    }
}

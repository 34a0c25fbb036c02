//! Derived state: a cached projection of a parent state
//!
//! One derive task serves every subscriber. It runs while at least one
//! stream is open; when the last one closes a cleanup timer starts, and if
//! nobody resubscribes before it fires the task stops, the replay slot is
//! emptied and the volatile storage slot is optionally removed.
//!
//! Every parent value is derived, one at a time and in publish order, so a
//! derive that folds in its previous result sees each step. Writes to the
//! volatile slot and the cleanup's removal of it are serialized behind a
//! per-handle guard.

use std::fmt;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::core_state::definition::{DeriveContext, DeriveDefinition, StateValue, StorageKey};
use crate::core_state::errors::{StateError, StateResult};
use crate::core_state::storage::StorageService;
use crate::core_state::stream::{Lease, StateCell, StateSource, StateStream};

pub struct DerivedState<TFrom, TTo, D = ()> {
    inner: Arc<DerivedInner<TFrom, TTo, D>>,
}

struct DerivedInner<TFrom, TTo, D> {
    parent: Arc<dyn StateSource<TFrom>>,
    definition: DeriveDefinition<TFrom, TTo, D>,
    dependencies: D,
    memory: Arc<dyn StorageService>,
    key: StorageKey,
    cleanup_delay: Duration,
    state: StateCell<TTo>,
    // Held while writing or removing the volatile slot
    slot: Mutex<()>,
    lifecycle: SyncMutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    subscribers: usize,
    generation: u64,
    derive_task: Option<JoinHandle<()>>,
    cleanup_task: Option<JoinHandle<()>>,
}

impl<TFrom, TTo, D> DerivedState<TFrom, TTo, D>
where
    TFrom: StateValue,
    TTo: StateValue,
    D: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        parent: Arc<dyn StateSource<TFrom>>,
        definition: DeriveDefinition<TFrom, TTo, D>,
        dependencies: D,
        memory: Arc<dyn StorageService>,
        default_cleanup_delay: Duration,
    ) -> Self {
        DerivedState {
            inner: Arc::new(DerivedInner {
                key: definition.storage_key(),
                cleanup_delay: definition.cleanup_delay().unwrap_or(default_cleanup_delay),
                parent,
                definition,
                dependencies,
                memory,
                state: StateCell::new(None),
                slot: Mutex::new(()),
                lifecycle: SyncMutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Stream of derived values. The first subscriber starts derivation.
    pub fn state(&self) -> StateStream<TTo> {
        let stream = self.inner.state.subscribe();
        self.inner.acquire();
        let inner = Arc::clone(&self.inner);
        stream.leased(Lease::new(move || inner.release()))
    }

    /// Persist and emit `value` without running the derive callback
    pub async fn force_value(&self, value: TTo) -> StateResult<TTo> {
        self.inner.store(&value).await?;
        self.inner.state.publish(value.clone());
        Ok(value)
    }

    /// Number of open streams
    pub fn subscriber_count(&self) -> usize {
        self.inner.lifecycle().subscribers
    }

    pub fn storage_key(&self) -> &StorageKey {
        &self.inner.key
    }

    pub fn definition(&self) -> &DeriveDefinition<TFrom, TTo, D> {
        &self.inner.definition
    }
}

impl<TFrom, TTo, D> DerivedInner<TFrom, TTo, D>
where
    TFrom: StateValue,
    TTo: StateValue,
    D: Clone + Send + Sync + 'static,
{
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        // Lifecycle counters stay consistent even if a holder panicked
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle();
        lifecycle.subscribers += 1;
        lifecycle.generation += 1;

        if let Some(cleanup) = lifecycle.cleanup_task.take() {
            cleanup.abort();
        }
        if lifecycle.derive_task.is_none() {
            debug!(key = %self.key, "starting derivation");
            lifecycle.derive_task = Some(tokio::spawn(Arc::clone(self).derive_loop()));
        }
    }

    fn release(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle();
        lifecycle.subscribers = lifecycle.subscribers.saturating_sub(1);
        if lifecycle.subscribers > 0 {
            return;
        }

        let generation = lifecycle.generation;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                let delay = self.cleanup_delay;
                lifecycle.cleanup_task = Some(runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.cleanup(generation).await;
                }));
            }
            Err(_) => {
                // Runtime is gone; nothing left to schedule the timer on
                if let Some(task) = lifecycle.derive_task.take() {
                    task.abort();
                }
                self.state.clear();
            }
        }
    }

    async fn cleanup(&self, generation: u64) {
        {
            let mut lifecycle = self.lifecycle();
            if lifecycle.subscribers > 0 || lifecycle.generation != generation {
                return;
            }
            // Committed: a resubscribe from here on can no longer abort this task
            lifecycle.cleanup_task = None;
            if let Some(task) = lifecycle.derive_task.take() {
                task.abort();
            }
            self.state.clear();
        }

        if self.definition.clear_on_cleanup() {
            let _slot = self.slot.lock().await;
            // A subscriber that arrived while we waited owns the slot again
            if self.lifecycle().generation != generation {
                debug!(key = %self.key, "derived state resubscribed during cleanup");
                return;
            }
            if let Err(e) = self.memory.remove(self.key.as_str()).await {
                error!(key = %self.key, error = %e, "failed to clear derived state");
                return;
            }
        }
        debug!(key = %self.key, "derived state cleaned up");
    }

    async fn derive_loop(self: Arc<Self>) {
        let mut parent = self.parent.subscribe();
        while let Some(from) = parent.next().await {
            let previous_state = if self.definition.include_previous_derived_state() {
                self.previous().await
            } else {
                None
            };
            let ctx = DeriveContext {
                dependencies: self.dependencies.clone(),
                previous_state,
            };

            match self.definition.run(from, ctx).await {
                Ok(value) => {
                    if let Err(e) = self.store(&value).await {
                        error!(key = %self.key, error = %e, "failed to cache derived value");
                    }
                    self.state.publish(value);
                }
                Err(e) => error!(key = %self.key, error = %e, "derivation failed"),
            }
        }
    }

    /// Previous value, read back from the volatile slot
    async fn previous(&self) -> Option<TTo> {
        match self.memory.get(self.key.as_str()).await {
            Ok(Some(Value::Object(mut slot))) if slot.get("derived") == Some(&Value::Bool(true)) => {
                let value = slot.remove("value")?;
                match self.definition.deserialize(value) {
                    Ok(previous) => Some(previous),
                    Err(e) => {
                        error!(key = %self.key, error = %e, "discarding unreadable derived value");
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(e) => {
                error!(key = %self.key, error = %e, "failed to read previous derived value");
                None
            }
        }
    }

    async fn store(&self, value: &TTo) -> StateResult<()> {
        let value = serde_json::to_value(value).map_err(|source| StateError::Serialization {
            key: self.key.to_string(),
            source,
        })?;
        let _slot = self.slot.lock().await;
        self.memory
            .save(self.key.as_str(), json!({ "derived": true, "value": value }))
            .await?;
        Ok(())
    }
}

impl<TFrom, TTo, D> StateSource<TTo> for DerivedState<TFrom, TTo, D>
where
    TFrom: StateValue,
    TTo: StateValue,
    D: Clone + Send + Sync + 'static,
{
    fn subscribe(&self) -> StateStream<TTo> {
        self.state()
    }
}

impl<TFrom, TTo, D> fmt::Debug for DerivedState<TFrom, TTo, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedState").field("key", &self.inner.key).finish()
    }
}

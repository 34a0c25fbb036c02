//! Derive definitions
//!
//! Describe a cached projection of a parent state: where the derived value
//! is cached (always the volatile store), how to compute it, and how long the
//! cache outlives its last subscriber.

use super::key_definition::{from_json, Deserializer, KeyDefinition, StateValue};
use super::state_definition::StateDefinition;
use super::storage_key::StorageKey;
use crate::core_state::errors::StateResult;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Inputs handed to a derive callback alongside the parent value
#[derive(Debug, Clone)]
pub struct DeriveContext<TTo, D> {
    /// Caller-supplied dependency bag
    pub dependencies: D,
    /// Previously derived value, when the definition asks for it
    pub previous_state: Option<TTo>,
}

/// Boxed derive callback
pub type DeriveFn<TFrom, TTo, D> =
    Arc<dyn Fn(TFrom, DeriveContext<TTo, D>) -> BoxFuture<'static, StateResult<TTo>> + Send + Sync>;

/// Storage and computation settings for a derived state
pub struct DeriveDefinition<TFrom, TTo, D = ()> {
    state_definition: StateDefinition,
    key: String,
    derive: DeriveFn<TFrom, TTo, D>,
    deserializer: Deserializer<TTo>,
    cleanup_delay: Option<Duration>,
    clear_on_cleanup: bool,
    include_previous_derived_state: bool,
}

impl<TFrom, TTo, D> DeriveDefinition<TFrom, TTo, D>
where
    TFrom: StateValue,
    TTo: StateValue + DeserializeOwned,
    D: Clone + Send + Sync + 'static,
{
    /// Define a derived state computed by an async callback
    pub fn new<F, Fut>(state_definition: StateDefinition, key: impl Into<String>, derive: F) -> Self
    where
        F: Fn(TFrom, DeriveContext<TTo, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StateResult<TTo>> + Send + 'static,
    {
        DeriveDefinition {
            state_definition,
            key: key.into(),
            derive: Arc::new(move |from: TFrom, ctx: DeriveContext<TTo, D>| derive(from, ctx).boxed()),
            deserializer: Arc::new(from_json::<TTo>),
            cleanup_delay: None,
            clear_on_cleanup: true,
            include_previous_derived_state: false,
        }
    }

    /// Define a derived state computed by a synchronous callback
    pub fn from_sync<F>(state_definition: StateDefinition, key: impl Into<String>, derive: F) -> Self
    where
        F: Fn(TFrom, DeriveContext<TTo, D>) -> StateResult<TTo> + Send + Sync + 'static,
    {
        Self::new(state_definition, key, move |from, ctx| {
            futures::future::ready(derive(from, ctx))
        })
    }

    /// Reuse the parent key's domain, name and cleanup delay
    pub fn from_key_definition<F, Fut>(parent: &KeyDefinition<TFrom>, derive: F) -> Self
    where
        F: Fn(TFrom, DeriveContext<TTo, D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StateResult<TTo>> + Send + 'static,
    {
        Self::new(*parent.state_definition(), parent.key(), derive)
            .with_cleanup_delay(parent.cleanup_delay())
    }
}

impl<TFrom, TTo, D> DeriveDefinition<TFrom, TTo, D> {
    /// Replace the deserializer used to read a previously derived value
    pub fn with_deserializer<F>(mut self, deserializer: F) -> Self
    where
        F: Fn(Value) -> Result<TTo, serde_json::Error> + Send + Sync + 'static,
    {
        self.deserializer = Arc::new(deserializer);
        self
    }

    /// Keep the cached value this long after the last subscriber leaves
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = Some(delay);
        self
    }

    /// Whether the volatile slot is deleted on cleanup (default true)
    pub fn with_clear_on_cleanup(mut self, clear: bool) -> Self {
        self.clear_on_cleanup = clear;
        self
    }

    /// Hand the previously derived value to every derive call
    pub fn with_previous_derived_state(mut self) -> Self {
        self.include_previous_derived_state = true;
        self
    }

    pub fn state_definition(&self) -> &StateDefinition {
        &self.state_definition
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cleanup delay, if the definition sets one
    pub fn cleanup_delay(&self) -> Option<Duration> {
        self.cleanup_delay
    }

    pub fn clear_on_cleanup(&self) -> bool {
        self.clear_on_cleanup
    }

    pub fn include_previous_derived_state(&self) -> bool {
        self.include_previous_derived_state
    }

    /// Volatile slot holding the derived value
    pub fn storage_key(&self) -> StorageKey {
        StorageKey::derived(&self.state_definition, &self.key)
    }

    /// `derived_storageLocation_domain_key`
    pub fn build_cache_key(&self) -> String {
        format!("derived_{}_{}", self.state_definition, self.key)
    }

    pub(crate) fn run(&self, from: TFrom, ctx: DeriveContext<TTo, D>) -> BoxFuture<'static, StateResult<TTo>> {
        (self.derive)(from, ctx)
    }

    pub(crate) fn deserialize(&self, value: Value) -> Result<TTo, serde_json::Error> {
        (self.deserializer)(value)
    }
}

impl<TFrom, TTo, D> Clone for DeriveDefinition<TFrom, TTo, D> {
    fn clone(&self) -> Self {
        DeriveDefinition {
            state_definition: self.state_definition,
            key: self.key.clone(),
            derive: Arc::clone(&self.derive),
            deserializer: Arc::clone(&self.deserializer),
            cleanup_delay: self.cleanup_delay,
            clear_on_cleanup: self.clear_on_cleanup,
            include_previous_derived_state: self.include_previous_derived_state,
        }
    }
}

impl<TFrom, TTo, D> fmt::Debug for DeriveDefinition<TFrom, TTo, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeriveDefinition")
            .field("state_definition", &self.state_definition)
            .field("key", &self.key)
            .field("cleanup_delay", &self.cleanup_delay)
            .field("clear_on_cleanup", &self.clear_on_cleanup)
            .field("include_previous_derived_state", &self.include_previous_derived_state)
            .finish_non_exhaustive()
    }
}

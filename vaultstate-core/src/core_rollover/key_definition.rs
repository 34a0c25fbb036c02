//! Rollover key definitions
//!
//! A rollover key names the staging slot a migration writes to, and says how
//! a staged payload is checked, converted and gated before it reaches the
//! output state.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core_state::definition::{from_json, Deserializer, KeyDefinition, StateDefinition, StateValue};
use crate::core_state::errors::StateResult;

pub type IsValidFn<I, D> = Arc<dyn Fn(I, D) -> BoxFuture<'static, bool> + Send + Sync>;
pub type MapFn<I, O, D> = Arc<dyn Fn(I, D) -> BoxFuture<'static, StateResult<O>> + Send + Sync>;
pub type ShouldRolloverFn<D> = Arc<dyn Fn(&D) -> bool + Send + Sync>;

/// Staging slot and conversion rules for a `RolloverState`
///
/// `I` is the staged payload, `O` the output state's value and `D` the
/// dependency the rollover waits on.
pub struct RolloverKeyDefinition<I, O = I, D = ()> {
    state_definition: StateDefinition,
    key: String,
    deserializer: Deserializer<I>,
    is_valid: Option<IsValidFn<I, D>>,
    map: MapFn<I, O, D>,
    should_rollover: Option<ShouldRolloverFn<D>>,
}

impl<I, D> RolloverKeyDefinition<I, I, D>
where
    I: StateValue + DeserializeOwned,
    D: Clone + Send + Sync + 'static,
{
    /// Staging key that accepts any payload and copies it to the output
    /// unchanged. The key must not be reused for anything else.
    pub fn new(state_definition: StateDefinition, key: impl Into<String>) -> Self {
        RolloverKeyDefinition {
            state_definition,
            key: key.into(),
            deserializer: Arc::new(from_json::<I>),
            is_valid: None,
            map: Arc::new(|input: I, _: D| futures::future::ready(StateResult::Ok(input)).boxed()),
            should_rollover: None,
        }
    }
}

impl<I, O, D> RolloverKeyDefinition<I, O, D>
where
    I: StateValue,
    O: StateValue,
    D: Clone + Send + Sync + 'static,
{
    /// Convert staged payloads into the output's shape
    pub fn with_map<O2, F, Fut>(self, map: F) -> RolloverKeyDefinition<I, O2, D>
    where
        O2: StateValue,
        F: Fn(I, D) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StateResult<O2>> + Send + 'static,
    {
        RolloverKeyDefinition {
            state_definition: self.state_definition,
            key: self.key,
            deserializer: self.deserializer,
            is_valid: self.is_valid,
            map: Arc::new(move |input: I, dependency: D| map(input, dependency).boxed()),
            should_rollover: self.should_rollover,
        }
    }

    /// Reject payloads that must not reach the output; rejected payloads are
    /// discarded
    pub fn with_is_valid<F, Fut>(mut self, is_valid: F) -> Self
    where
        F: Fn(I, D) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.is_valid = Some(Arc::new(move |input: I, dependency: D| is_valid(input, dependency).boxed()));
        self
    }

    /// Hold staged payloads until the dependency satisfies `gate`
    pub fn with_should_rollover<F>(mut self, gate: F) -> Self
    where
        F: Fn(&D) -> bool + Send + Sync + 'static,
    {
        self.should_rollover = Some(Arc::new(gate));
        self
    }

    pub fn with_deserializer<F>(mut self, deserializer: F) -> Self
    where
        F: Fn(Value) -> Result<I, serde_json::Error> + Send + Sync + 'static,
    {
        self.deserializer = Arc::new(deserializer);
        self
    }

    pub fn state_definition(&self) -> &StateDefinition {
        &self.state_definition
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key definition of the staging slot; empty means nothing is staged
    pub fn to_key_definition(&self) -> KeyDefinition<Option<I>> {
        let deserializer = Arc::clone(&self.deserializer);
        KeyDefinition::with_deserializer(self.state_definition, self.key.clone(), None, move |value| {
            deserializer(value).map(Some)
        })
    }

    pub fn should_rollover(&self, dependency: &D) -> bool {
        self.should_rollover
            .as_ref()
            .map_or(true, |gate| gate(dependency))
    }

    pub async fn is_valid(&self, input: I, dependency: D) -> bool {
        match &self.is_valid {
            Some(is_valid) => is_valid(input, dependency).await,
            None => true,
        }
    }

    pub async fn map(&self, input: I, dependency: D) -> StateResult<O> {
        (self.map)(input, dependency).await
    }
}

impl<I, O, D> Clone for RolloverKeyDefinition<I, O, D> {
    fn clone(&self) -> Self {
        RolloverKeyDefinition {
            state_definition: self.state_definition,
            key: self.key.clone(),
            deserializer: Arc::clone(&self.deserializer),
            is_valid: self.is_valid.clone(),
            map: Arc::clone(&self.map),
            should_rollover: self.should_rollover.clone(),
        }
    }
}

impl<I, O, D> fmt::Debug for RolloverKeyDefinition<I, O, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RolloverKeyDefinition")
            .field("state_definition", &self.state_definition)
            .field("key", &self.key)
            .field("is_valid", &self.is_valid.is_some())
            .field("should_rollover", &self.should_rollover.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::definition::state_definitions::GENERATOR_DISK;
    use serde_json::json;

    #[tokio::test]
    async fn test_defaults() {
        let def = RolloverKeyDefinition::<String>::new(GENERATOR_DISK, "rollover");
        assert!(def.should_rollover(&()));
        assert!(def.is_valid("payload".to_string(), ()).await);
        assert_eq!(def.map("payload".to_string(), ()).await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_custom_rules() {
        let def = RolloverKeyDefinition::<String, String, bool>::new(GENERATOR_DISK, "rollover")
            .with_is_valid(|input: String, _| async move { input.starts_with("signed:") })
            .with_should_rollover(|unlocked| *unlocked)
            .with_map(|input: String, _| async move { Ok(input.len()) });

        assert!(!def.should_rollover(&false));
        assert!(def.should_rollover(&true));
        assert!(!def.is_valid("tampered".to_string(), true).await);
        assert_eq!(def.map("signed:x".to_string(), true).await.unwrap(), 8);
    }

    #[test]
    fn test_staging_key_defaults_to_empty() {
        let def = RolloverKeyDefinition::<u32>::new(GENERATOR_DISK, "pendingLength");
        let key = def.to_key_definition();
        assert_eq!(key.build_cache_key(), "disk_generator_pendingLength");
        assert_eq!(key.deserialize(None).unwrap(), None);
        assert_eq!(key.deserialize(Some(json!(7))).unwrap(), Some(7));
    }
}

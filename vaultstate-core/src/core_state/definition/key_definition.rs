/*
    key_definition.rs - Identity, default and deserializer of one stored value

    A KeyDefinition subdivides a StateDefinition's domain into a single key.
    It owns:
    - the deserializer that turns stored JSON back into `T`
    - the initial value used whenever nothing (or JSON null) is stored
    - per-key options (cleanup delay, clear events)
*/

use super::state_definition::{StateDefinition, StorageLocation};
use crate::core_state::events::ClearEvent;
use serde::de::{DeserializeOwned, Error as _};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How long an unobserved replay buffer is kept before it is torn down
pub const DEFAULT_CLEANUP_DELAY: Duration = Duration::from_millis(1000);

/// Bounds every stored value satisfies
pub trait StateValue: Clone + Serialize + Send + Sync + 'static {}

impl<T> StateValue for T where T: Clone + Serialize + Send + Sync + 'static {}

/// Converts stored JSON into a value
pub type Deserializer<T> = Arc<dyn Fn(Value) -> Result<T, serde_json::Error> + Send + Sync>;

/// Default element deserializer, usable with [`KeyDefinition::array`] and
/// [`KeyDefinition::record`]
pub fn from_json<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}

/// Domain and key name of a definition, without its value type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyCoordinates {
    pub state_definition: StateDefinition,
    pub key: String,
}

impl KeyCoordinates {
    /// `storageLocation_domain_key`
    pub fn build_cache_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.state_definition.storage_location(),
            self.state_definition.name(),
            self.key
        )
    }
}

/// Describes the precise location and shape of one piece of state
#[derive(Clone)]
pub struct KeyDefinition<T> {
    state_definition: StateDefinition,
    key: String,
    deserializer: Deserializer<T>,
    initial_value: T,
    cleanup_delay: Duration,
    clear_on: Vec<ClearEvent>,
}

impl<T: StateValue> KeyDefinition<T> {
    /// Create a key that deserializes with serde and defaults to `initial_value`
    pub fn new(state_definition: StateDefinition, key: impl Into<String>, initial_value: T) -> Self
    where
        T: DeserializeOwned,
    {
        Self::with_deserializer(state_definition, key, initial_value, from_json::<T>)
    }

    /// Create a key with a caller-supplied deserializer
    pub fn with_deserializer<F>(
        state_definition: StateDefinition,
        key: impl Into<String>,
        initial_value: T,
        deserializer: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<T, serde_json::Error> + Send + Sync + 'static,
    {
        KeyDefinition {
            state_definition,
            key: key.into(),
            deserializer: Arc::new(deserializer),
            initial_value,
            cleanup_delay: DEFAULT_CLEANUP_DELAY,
            clear_on: Vec::new(),
        }
    }

    /// Set the cleanup delay
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Set the events that clear this key for a user
    pub fn with_clear_on(mut self, events: impl IntoIterator<Item = ClearEvent>) -> Self {
        self.clear_on = events.into_iter().collect();
        self
    }

    /// Domain this key belongs to
    pub fn state_definition(&self) -> &StateDefinition {
        &self.state_definition
    }

    /// Key name within the domain
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Backend the key is stored in
    pub fn storage_location(&self) -> StorageLocation {
        self.state_definition.storage_location()
    }

    /// Value used when nothing is stored
    pub fn initial_value(&self) -> T {
        self.initial_value.clone()
    }

    /// Delay before an unobserved replay buffer is dropped
    pub fn cleanup_delay(&self) -> Duration {
        self.cleanup_delay
    }

    /// Events that clear this key
    pub fn clear_on(&self) -> &[ClearEvent] {
        &self.clear_on
    }

    pub fn coordinates(&self) -> KeyCoordinates {
        KeyCoordinates {
            state_definition: self.state_definition,
            key: self.key.clone(),
        }
    }

    /// `storageLocation_domain_key`; unique per application and used as the
    /// provider's cache key
    pub fn build_cache_key(&self) -> String {
        self.coordinates().build_cache_key()
    }

    /// Turn a stored value into `T`. Absent values and JSON null yield the
    /// initial value without reaching the deserializer.
    pub fn deserialize(&self, stored: Option<Value>) -> Result<T, serde_json::Error> {
        match stored {
            None | Some(Value::Null) => Ok(self.initial_value()),
            Some(value) => (self.deserializer)(value),
        }
    }
}

impl<E: StateValue> KeyDefinition<Vec<E>> {
    /// List-shaped key; `element` is applied to every item and the default is
    /// an empty list
    pub fn array<F>(state_definition: StateDefinition, key: impl Into<String>, element: F) -> Self
    where
        F: Fn(Value) -> Result<E, serde_json::Error> + Send + Sync + 'static,
    {
        Self::with_deserializer(state_definition, key, Vec::new(), move |value| match value {
            Value::Array(items) => items.into_iter().map(&element).collect(),
            other => Err(serde_json::Error::custom(format!(
                "expected an array, found {}",
                json_kind(&other)
            ))),
        })
    }
}

impl<E: StateValue> KeyDefinition<BTreeMap<String, E>> {
    /// Map-shaped key; `element` is applied to every value and the default is
    /// an empty map
    pub fn record<F>(state_definition: StateDefinition, key: impl Into<String>, element: F) -> Self
    where
        F: Fn(Value) -> Result<E, serde_json::Error> + Send + Sync + 'static,
    {
        Self::with_deserializer(state_definition, key, BTreeMap::new(), move |value| match value {
            Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| element(v).map(|e| (k, e)))
                .collect(),
            other => Err(serde_json::Error::custom(format!(
                "expected an object, found {}",
                json_kind(&other)
            ))),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl<T> fmt::Debug for KeyDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDefinition")
            .field("state_definition", &self.state_definition)
            .field("key", &self.key)
            .field("cleanup_delay", &self.cleanup_delay)
            .field("clear_on", &self.clear_on)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    const FAKE_DISK: StateDefinition = StateDefinition::new("fake", StorageLocation::Disk);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Folder {
        id: String,
        name: String,
    }

    #[test]
    fn test_cache_key_format() {
        let key = KeyDefinition::new(FAKE_DISK, "fakeKey", false);
        assert_eq!(key.build_cache_key(), "disk_fake_fakeKey");
    }

    #[test]
    fn test_absent_value_uses_initial() {
        let key = KeyDefinition::new(FAKE_DISK, "counter", 7u32);
        assert_eq!(key.deserialize(None).unwrap(), 7);
        assert_eq!(key.deserialize(Some(Value::Null)).unwrap(), 7);
        assert_eq!(key.deserialize(Some(json!(3))).unwrap(), 3);
    }

    #[test]
    fn test_custom_deserializer() {
        let key = KeyDefinition::with_deserializer(FAKE_DISK, "upper", String::new(), |v| {
            from_json::<String>(v).map(|s| s.to_uppercase())
        });
        assert_eq!(key.deserialize(Some(json!("abc"))).unwrap(), "ABC");
    }

    #[test]
    fn test_array_applies_element_deserializer() {
        let key = KeyDefinition::array(FAKE_DISK, "folders", from_json::<Folder>);
        assert!(key.deserialize(None).unwrap().is_empty());

        let folders = key
            .deserialize(Some(json!([{ "id": "1", "name": "Work" }, { "id": "2", "name": "Home" }])))
            .unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[1].name, "Home");
    }

    #[test]
    fn test_array_rejects_non_array() {
        let key = KeyDefinition::array(FAKE_DISK, "folders", from_json::<Folder>);
        let err = key.deserialize(Some(json!({ "id": "1" }))).unwrap_err();
        assert!(err.to_string().contains("expected an array"));
    }

    #[test]
    fn test_record_defaults_to_empty_map() {
        let key = KeyDefinition::record(FAKE_DISK, "folderMap", from_json::<Folder>);
        let value = key.deserialize(None).unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn test_record_applies_element_deserializer() {
        let key = KeyDefinition::record(FAKE_DISK, "folderMap", from_json::<Folder>);
        let value = key
            .deserialize(Some(json!({ "a": { "id": "a", "name": "Work" } })))
            .unwrap();
        assert_eq!(value["a"].name, "Work");
    }

    #[test]
    fn test_options_builders() {
        let key = KeyDefinition::new(FAKE_DISK, "opts", 0u8)
            .with_cleanup_delay(Duration::from_millis(50))
            .with_clear_on([ClearEvent::Logout]);
        assert_eq!(key.cleanup_delay(), Duration::from_millis(50));
        assert_eq!(key.clear_on(), &[ClearEvent::Logout]);
    }
}

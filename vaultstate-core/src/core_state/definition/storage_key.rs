/*
    storage_key.rs - Physical keys handed to storage backends

    global_{domain}_{key}          one slot for the whole process
    user_{userId}_{domain}_{key}   one slot per account
    derived_{domain}_{key}         volatile slot holding a derived value

    Equality and hashing consider the components only, never the rendered
    string, so two keys are equal iff scope, domain and key are equal.
*/

use super::key_definition::KeyDefinition;
use super::state_definition::StateDefinition;
use crate::core_account::UserId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Which slot family a key belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyScope {
    Global,
    User(UserId),
    Derived,
}

/// Opaque key combining a definition's coordinates with an optional user id
#[derive(Debug, Clone)]
pub struct StorageKey {
    scope: KeyScope,
    domain: String,
    key: String,
    rendered: String,
}

impl StorageKey {
    fn build(scope: KeyScope, domain: &str, key: &str) -> Self {
        let rendered = match &scope {
            KeyScope::Global => format!("global_{}_{}", domain, key),
            KeyScope::User(user_id) => format!("user_{}_{}_{}", user_id, domain, key),
            KeyScope::Derived => format!("derived_{}_{}", domain, key),
        };
        StorageKey {
            scope,
            domain: domain.to_string(),
            key: key.to_string(),
            rendered,
        }
    }

    /// Key for state shared by every account
    pub fn global<T>(definition: &KeyDefinition<T>) -> Self
    where
        T: super::key_definition::StateValue,
    {
        Self::build(KeyScope::Global, definition.state_definition().name(), definition.key())
    }

    /// Key for one account's slot
    pub fn user<T>(user_id: &UserId, definition: &KeyDefinition<T>) -> Self
    where
        T: super::key_definition::StateValue,
    {
        Self::for_user(user_id, definition.state_definition(), definition.key())
    }

    /// Key for one account's slot, from raw coordinates
    pub fn for_user(user_id: &UserId, state_definition: &StateDefinition, key: &str) -> Self {
        Self::build(KeyScope::User(user_id.clone()), state_definition.name(), key)
    }

    /// Key for a derived value's volatile slot
    pub fn derived(state_definition: &StateDefinition, key: &str) -> Self {
        Self::build(KeyScope::Derived, state_definition.name(), key)
    }

    /// Rendered form passed to the backend
    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    /// Slot family
    pub fn scope(&self) -> &KeyScope {
        &self.scope
    }

    /// True when `raw` is this key's rendered form
    pub fn matches(&self, raw: &str) -> bool {
        self.rendered == raw
    }
}

impl PartialEq for StorageKey {
    fn eq(&self, other: &Self) -> bool {
        self.scope == other.scope && self.domain == other.domain && self.key == other.key
    }
}

impl Eq for StorageKey {}

impl Hash for StorageKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scope.hash(state);
        self.domain.hash(state);
        self.key.hash(state);
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for StorageKey {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

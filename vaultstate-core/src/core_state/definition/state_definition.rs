/*
    state_definition.rs - Domain and storage location descriptors

    A StateDefinition names a family of keys and decides which backend
    holds them. Names must be unique across the application; see
    `state_definitions.rs` for the registry and its uniqueness test.
*/

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical backend a state lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    /// Durable storage
    Disk,
    /// Volatile storage, cleared when the process exits
    Memory,
    /// Platform-protected storage (keychain and friends)
    Secure,
}

impl StorageLocation {
    /// Lowercase name used when building cache keys
    pub const fn as_str(&self) -> &'static str {
        match self {
            StorageLocation::Disk => "disk",
            StorageLocation::Memory => "memory",
            StorageLocation::Secure => "secure",
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain + storage location descriptor for a family of keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateDefinition {
    name: &'static str,
    storage_location: StorageLocation,
}

impl StateDefinition {
    /// Create a new state definition
    pub const fn new(name: &'static str, storage_location: StorageLocation) -> Self {
        StateDefinition {
            name,
            storage_location,
        }
    }

    /// Domain name
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Backend the domain is stored in
    pub const fn storage_location(&self) -> StorageLocation {
        self.storage_location
    }
}

impl fmt::Display for StateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.storage_location, self.name)
    }
}

/*
    errors.rs - Error types for the state subsystem

    Defines all error types that can occur in:
    - Storage backend calls
    - Reading and writing state handles
    - Dependency waits inside update
    - Provider cache lookups
*/

use crate::core_account::UserId;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend cannot currently serve requests
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Underlying I/O failed
    #[error("Storage I/O error: {0}")]
    Io(String),

    /// Value could not be encoded for the backend
    #[error("Storage serialization error: {0}")]
    Serialization(String),

    /// Internal backend failure
    #[error("Storage internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Result type for storage backend calls
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the state subsystem
#[derive(Debug, Error)]
pub enum StateError {
    /// Active-user operation attempted while nobody is signed in
    #[error("No active user for state {key}")]
    NoActiveUser { key: String },

    /// The combined dependency did not produce a value in time
    #[error("Dependency for state {key} did not emit within {timeout:?}")]
    DependencyTimeout { key: String, timeout: Duration },

    /// The combined dependency completed without producing a value
    #[error("Dependency for state {key} closed before emitting")]
    DependencyClosed { key: String },

    /// Backend failure, propagated verbatim
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Stored JSON could not be turned into the key's value type
    #[error("Failed to deserialize {key}: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Value could not be turned into JSON for storage
    #[error("Failed to serialize {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Two definitions share coordinates but disagree on the value type
    #[error("Cached state {cache_key} was created with a different value type")]
    TypeMismatch { cache_key: String },

    /// Account id is not present in the accounts record
    #[error("Unknown account: {0}")]
    UnknownAccount(UserId),

    /// Derive callback failed
    #[error("Derivation of {key} failed: {message}")]
    Derive { key: String, message: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StateError {
    /// Build a deserialization error for a storage key
    pub fn deserialization(key: impl Into<String>, source: serde_json::Error) -> Self {
        StateError::Deserialization {
            key: key.into(),
            source,
        }
    }

    /// Build a derivation error with a free-form message
    pub fn derive(key: impl Into<String>, message: impl Into<String>) -> Self {
        StateError::Derive {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

/// Helper to convert poison errors into StateError
pub(crate) fn handle_poison<T>(_err: std::sync::PoisonError<T>) -> StateError {
    StateError::Internal("Lock poisoned: a thread panicked while holding the lock".to_string())
}

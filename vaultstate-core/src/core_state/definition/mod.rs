/*
    Definition subsystem - static descriptors of where state lives
*/

pub mod derive_definition;
pub mod key_definition;
pub mod state_definition;
pub mod state_definitions;
pub mod storage_key;

pub use derive_definition::{DeriveContext, DeriveDefinition, DeriveFn};
pub use key_definition::{
    from_json, Deserializer, KeyCoordinates, KeyDefinition, StateValue, DEFAULT_CLEANUP_DELAY,
};
pub use state_definition::{StateDefinition, StorageLocation};
pub use storage_key::{KeyScope, StorageKey};

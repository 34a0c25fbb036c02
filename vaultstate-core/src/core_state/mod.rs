/*
    State subsystem - reactive key/value state over pluggable storage

    Layers, leaves first:
    - definition: where a value lives and how it is read back
    - storage: backend contract and the in-memory backend
    - stream: replay-of-one value streams
    - state: global, single-user, active-user and derived handles
    - provider: per-coordinate handle caches and the StateProvider facade
*/

pub mod definition;
pub mod errors;
pub mod events;
pub mod provider;
pub mod state;
pub mod storage;
pub mod stream;
pub mod update_options;

pub use definition::{
    DeriveContext, DeriveDefinition, KeyDefinition, StateDefinition, StateValue, StorageKey,
    StorageLocation,
};
pub use errors::{StateError, StateResult, StorageError, StorageResult};
pub use events::{ClearEvent, StateEventRegistry};
pub use provider::{
    ActiveUserStateProvider, DerivedStateProvider, GlobalStateProvider, SingleUserStateProvider,
    StateProvider,
};
pub use state::{ActiveUserState, DerivedState, GlobalState, SingleUserState};
pub use storage::{
    MemoryStorageService, StorageService, StorageServiceProvider, StorageUpdate, StorageUpdateType,
};
pub use stream::{StateSource, StateStream, StateSubject};
pub use update_options::UpdateOptions;

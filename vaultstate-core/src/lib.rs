pub mod config;
pub mod core_account;
pub mod core_rollover;
pub mod core_state;
pub mod logging;
pub mod test_utils;

pub use config::Config;
pub use core_account::{Account, AccountInfo, AccountService, AuthStatus, DefaultAccountService, UserId};
pub use core_rollover::{RolloverKeyDefinition, RolloverState};
pub use core_state::{
    ClearEvent, DeriveDefinition, KeyDefinition, StateDefinition, StateError, StateProvider,
    StateResult, StorageLocation, UpdateOptions,
};
pub use logging::{init_logging, LogLevel};

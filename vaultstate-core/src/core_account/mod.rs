/*
    Account subsystem - who is signed in

    The state layer consumes one thing from here: a watch stream of the
    active account, used by active-user state to re-key on account switch.
*/

pub mod service;
pub mod types;

pub use service::{
    accounts_key, active_account_id_key, AccountService, AccountsRecord, DefaultAccountService,
};
pub use types::{Account, AccountInfo, AuthStatus, UserId};

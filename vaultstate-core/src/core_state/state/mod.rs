/*
    State handles

    - GlobalState: one slot per key
    - SingleUserState: one slot per (key, account)
    - ActiveUserState: follows the signed-in account
    - DerivedState: cached projection with delayed cleanup
*/

pub(crate) mod base;
pub mod active_user;
pub mod derived;
pub mod global;
pub mod single_user;

pub use active_user::ActiveUserState;
pub use derived::DerivedState;
pub use global::GlobalState;
pub use single_user::SingleUserState;

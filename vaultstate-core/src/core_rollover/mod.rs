/*
    Rollover subsystem - lazy migration of staged data

    A migration stages a payload with `RolloverState::rollover`; the payload
    is validated, converted and moved into the output state the first time
    the state is observed.
*/

pub mod key_definition;
pub mod state;

pub use key_definition::RolloverKeyDefinition;
pub use state::RolloverState;

//! Clear events
//!
//! User-scoped keys can ask to be wiped when their account locks or logs
//! out. Single-user handles register their definition here when they are
//! created; the provider walks the registrations when an event fires.

use crate::core_state::definition::{KeyCoordinates, KeyDefinition, StateValue};
use crate::core_state::errors::{handle_poison, StateResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

/// Account lifecycle events that can clear user state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearEvent {
    Lock,
    Logout,
}

impl fmt::Display for ClearEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearEvent::Lock => f.write_str("lock"),
            ClearEvent::Logout => f.write_str("logout"),
        }
    }
}

/// Which user keys are cleared by which event
#[derive(Debug, Default)]
pub struct StateEventRegistry {
    registrations: RwLock<HashMap<ClearEvent, HashSet<KeyCoordinates>>>,
}

impl StateEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the clear events of a key definition. Keys without events are
    /// ignored.
    pub fn register<T: StateValue>(&self, definition: &KeyDefinition<T>) -> StateResult<()> {
        if definition.clear_on().is_empty() {
            return Ok(());
        }

        let mut registrations = self.registrations.write().map_err(handle_poison)?;
        for event in definition.clear_on() {
            registrations.entry(*event).or_default().insert(definition.coordinates());
        }
        Ok(())
    }

    /// Keys registered for an event
    pub fn registered(&self, event: ClearEvent) -> StateResult<Vec<KeyCoordinates>> {
        Ok(self
            .registrations
            .read()
            .map_err(handle_poison)?
            .get(&event)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }
}

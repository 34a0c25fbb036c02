//! Options accepted by `update_with` on every writable state handle

use std::fmt;
use std::time::Duration;

use crate::core_state::stream::StateStream;

pub type ShouldUpdate<T, D> = Box<dyn FnOnce(&T, Option<&D>) -> bool + Send>;

/// Gate, dependency and timeout for a single update
///
/// `D` is the type of the dependency stream. Updates that do not combine
/// with another stream use the default `()`.
pub struct UpdateOptions<T, D = ()> {
    pub(crate) should_update: Option<ShouldUpdate<T, D>>,
    pub(crate) combine_latest_with: Option<StateStream<D>>,
    pub(crate) timeout: Option<Duration>,
}

impl<T, D> UpdateOptions<T, D> {
    pub fn new() -> Self {
        UpdateOptions {
            should_update: None,
            combine_latest_with: None,
            timeout: None,
        }
    }

    /// Skip the update (no write, no emission) when the gate returns false
    pub fn with_should_update(
        mut self,
        gate: impl FnOnce(&T, Option<&D>) -> bool + Send + 'static,
    ) -> Self {
        self.should_update = Some(Box::new(gate));
        self
    }

    /// Wait for a value from `dependency` and hand it to the gate and the
    /// configure function
    pub fn with_combine_latest(mut self, dependency: StateStream<D>) -> Self {
        self.combine_latest_with = Some(dependency);
        self
    }

    /// How long to wait for the dependency. Falls back to the configured
    /// `state.update_timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<T, D> Default for UpdateOptions<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, D> fmt::Debug for UpdateOptions<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("should_update", &self.should_update.is_some())
            .field("combine_latest_with", &self.combine_latest_with.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

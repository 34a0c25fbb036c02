//! Rollover state
//!
//! Wraps one account's output state together with a staging slot. Writes
//! to the staging slot (`rollover`) do not touch the output. Observing
//! `state()` drains a staged payload into the output once the dependency
//! allows it: the payload is validated, mapped, written to the output and
//! the staging slot is cleared. Invalid payloads are discarded.
//!
//! Drains are serialized behind a lock shared by every handle for the same
//! staging slot, and each drain re-reads the slot under that lock, so a
//! payload is applied at most once however many observers race for it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::key_definition::RolloverKeyDefinition;
use crate::core_account::UserId;
use crate::core_state::definition::StateValue;
use crate::core_state::errors::StateResult;
use crate::core_state::state::SingleUserState;
use crate::core_state::stream::{Lease, StateCell, StateSource, StateStream};
use crate::core_state::update_options::UpdateOptions;

pub struct RolloverState<I, O, D = ()> {
    inner: Arc<RolloverInner<I, O, D>>,
}

struct RolloverInner<I, O, D> {
    definition: RolloverKeyDefinition<I, O, D>,
    input: Arc<SingleUserState<Option<I>>>,
    output: Arc<SingleUserState<O>>,
    dependency: Arc<dyn StateSource<D>>,
    drain_lock: Arc<Mutex<()>>,
}

impl<I, O, D> RolloverState<I, O, D>
where
    I: StateValue,
    O: StateValue,
    D: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        definition: RolloverKeyDefinition<I, O, D>,
        input: Arc<SingleUserState<Option<I>>>,
        output: Arc<SingleUserState<O>>,
        dependency: Arc<dyn StateSource<D>>,
        drain_lock: Arc<Mutex<()>>,
    ) -> Self {
        RolloverState {
            inner: Arc::new(RolloverInner {
                definition,
                input,
                output,
                dependency,
                drain_lock,
            }),
        }
    }

    pub fn user_id(&self) -> &UserId {
        self.inner.output.user_id()
    }

    /// The output value, after draining whatever is staged
    pub fn state(&self) -> StateStream<O> {
        let cell = StateCell::new(None);
        let stream = cell.subscribe();
        let driver = tokio::spawn(Arc::clone(&self.inner).drive(cell));
        stream.leased(Lease::new(move || driver.abort()))
    }

    pub fn combined_state(&self) -> StateStream<(UserId, O)> {
        let user_id = self.user_id().clone();
        self.state().map(move |value| (user_id.clone(), value))
    }

    /// The pending payload; `None` when nothing is staged
    pub fn input_state(&self) -> StateStream<Option<I>> {
        self.inner.input.state()
    }

    /// Stage a payload. `None` is ignored.
    pub async fn rollover(&self, value: Option<I>) -> StateResult<()> {
        if let Some(value) = value {
            self.inner.input.update(move |_| Some(value)).await?;
            debug!(user = %self.user_id(), key = %self.inner.definition.key(), "rollover staged");
        }
        Ok(())
    }

    /// Update the output state directly
    pub async fn update<F>(&self, configure: F) -> StateResult<O>
    where
        F: FnOnce(O) -> O + Send,
    {
        self.inner.output.update(configure).await
    }

    pub async fn update_with<T, F>(&self, configure: F, options: UpdateOptions<O, T>) -> StateResult<O>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(O, Option<T>) -> O + Send,
    {
        self.inner.output.update_with(configure, options).await
    }
}

impl<I, O, D> RolloverInner<I, O, D>
where
    I: StateValue,
    O: StateValue,
    D: Clone + Send + Sync + 'static,
{
    async fn drive(self: Arc<Self>, cell: StateCell<O>) {
        let mut input = self.input.state();
        let mut output = self.output.state();
        let mut dependency = self.dependency.subscribe();

        let mut staged: Option<Option<I>> = None;
        let mut current: Option<O> = None;
        let mut gate: Option<D> = None;
        let mut dependency_open = true;

        loop {
            tokio::select! {
                _ = cell.closed() => break,
                next = input.next() => match next {
                    Some(value) => staged = Some(value),
                    None => break,
                },
                next = output.next() => match next {
                    Some(value) => current = Some(value),
                    None => break,
                },
                next = dependency.next(), if dependency_open => match next {
                    Some(value) => gate = Some(value),
                    // A finished dependency keeps its last value
                    None => dependency_open = false,
                },
            }

            let (Some(staged), Some(current), Some(gate)) = (&staged, &current, &gate) else {
                continue;
            };

            if staged.is_some() && self.definition.should_rollover(gate) {
                match self.drain(gate.clone()).await {
                    // The drain's own writes re-enter this loop
                    Ok(()) => continue,
                    Err(e) => error!(key = %self.definition.key(), error = %e, "rollover failed"),
                }
            }

            cell.publish(current.clone());
        }
    }

    async fn drain(&self, dependency: D) -> StateResult<()> {
        let _guard = self.drain_lock.lock().await;

        // Another observer may have drained while we waited
        let Some(staged) = self.input.get_from_state().await? else {
            return Ok(());
        };

        if !self.definition.is_valid(staged.clone(), dependency.clone()).await {
            warn!(
                user = %self.output.user_id(),
                key = %self.definition.key(),
                "discarding invalid rollover payload"
            );
            self.input.update(|_| None).await?;
            return Ok(());
        }

        let mapped = self.definition.map(staged, dependency).await?;
        self.output.update(move |_| mapped).await?;
        self.input.update(|_| None).await?;
        debug!(user = %self.output.user_id(), key = %self.definition.key(), "rollover drained");
        Ok(())
    }
}

impl<I, O, D> StateSource<O> for RolloverState<I, O, D>
where
    I: StateValue,
    O: StateValue,
    D: Clone + Send + Sync + 'static,
{
    fn subscribe(&self) -> StateStream<O> {
        self.state()
    }
}

impl<I, O: StateValue, D> fmt::Debug for RolloverState<I, O, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RolloverState")
            .field("definition", &self.inner.definition)
            .field("output", &self.inner.output)
            .finish()
    }
}

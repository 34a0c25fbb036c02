//! Active-user state: a key that follows the signed-in account
//!
//! The handle never owns storage itself. A background task watches the
//! account stream and, on every change of active user id, switches its
//! source to that user's single-user handle. Status changes of the same
//! account do not re-key. Updates are routed to the single-user handle of
//! whoever is active when the update is issued.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tracing::{debug, error};

use crate::core_account::{Account, UserId};
use crate::core_state::definition::{KeyDefinition, StateValue};
use crate::core_state::errors::{StateError, StateResult};
use crate::core_state::provider::SingleUserStateProvider;
use crate::core_state::state::single_user::SingleUserState;
use crate::core_state::stream::{StateCell, StateSource, StateStream};
use crate::core_state::update_options::UpdateOptions;

pub struct ActiveUserState<T> {
    definition: KeyDefinition<T>,
    accounts: watch::Receiver<Option<Account>>,
    users: Arc<SingleUserStateProvider>,
    state: Arc<StateCell<T>>,
    combined: Arc<StateCell<(UserId, T)>>,
    _shutdown: oneshot::Sender<()>,
}

impl<T: StateValue> ActiveUserState<T> {
    pub(crate) fn new(
        definition: KeyDefinition<T>,
        accounts: watch::Receiver<Option<Account>>,
        users: Arc<SingleUserStateProvider>,
    ) -> Self {
        let state = Arc::new(StateCell::new(None));
        let combined = Arc::new(StateCell::new(None));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(follow_active_user(
            definition.clone(),
            accounts.clone(),
            Arc::clone(&users),
            Arc::clone(&state),
            Arc::clone(&combined),
            shutdown_rx,
        ));

        ActiveUserState {
            definition,
            accounts,
            users,
            state,
            combined,
            _shutdown: shutdown_tx,
        }
    }

    /// The active user's value; re-emits on account switch
    pub fn state(&self) -> StateStream<T> {
        self.state.subscribe()
    }

    /// The active user's id paired with its value
    pub fn combined_state(&self) -> StateStream<(UserId, T)> {
        self.combined.subscribe()
    }

    /// Id of the account updates would currently be routed to
    pub fn active_user_id(&self) -> Option<UserId> {
        self.accounts.borrow().as_ref().map(|account| account.id.clone())
    }

    /// Update the active user's slot
    pub async fn update<F>(&self, configure: F) -> StateResult<(UserId, T)>
    where
        F: FnOnce(T) -> T + Send,
    {
        self.update_with(|current, _: Option<()>| configure(current), UpdateOptions::new())
            .await
    }

    pub async fn update_with<D, F>(
        &self,
        configure: F,
        options: UpdateOptions<T, D>,
    ) -> StateResult<(UserId, T)>
    where
        D: Clone + Send + Sync + 'static,
        F: FnOnce(T, Option<D>) -> T + Send,
    {
        let handle = self.active_handle()?;
        let value = handle.update_with(configure, options).await?;
        Ok((handle.user_id().clone(), value))
    }

    /// Update a specific user's slot, active or not
    pub async fn update_for<F>(&self, user_id: &UserId, configure: F) -> StateResult<T>
    where
        F: FnOnce(T) -> T + Send,
    {
        self.users.get(user_id, &self.definition)?.update(configure).await
    }

    /// One direct backend read of the active user's slot
    pub async fn get_from_state(&self) -> StateResult<T> {
        self.active_handle()?.get_from_state().await
    }

    pub fn key_definition(&self) -> &KeyDefinition<T> {
        &self.definition
    }

    fn active_handle(&self) -> StateResult<Arc<SingleUserState<T>>> {
        let user_id = self.active_user_id().ok_or_else(|| StateError::NoActiveUser {
            key: self.definition.build_cache_key(),
        })?;
        self.users.get(&user_id, &self.definition)
    }
}

impl<T: StateValue> StateSource<T> for ActiveUserState<T> {
    fn subscribe(&self) -> StateStream<T> {
        self.state()
    }
}

impl<T: StateValue> fmt::Debug for ActiveUserState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveUserState")
            .field("key", &self.definition.build_cache_key())
            .field("active_user", &self.active_user_id())
            .finish()
    }
}

type Source<T> = Option<(UserId, StateStream<T>)>;

async fn next_from<T: Clone>(source: &mut Source<T>) -> Option<(UserId, T)> {
    match source {
        Some((user_id, stream)) => stream.next().await.map(|value| (user_id.clone(), value)),
        None => std::future::pending().await,
    }
}

async fn follow_active_user<T: StateValue>(
    definition: KeyDefinition<T>,
    mut accounts: watch::Receiver<Option<Account>>,
    users: Arc<SingleUserStateProvider>,
    state: Arc<StateCell<T>>,
    combined: Arc<StateCell<(UserId, T)>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut following: Option<Option<UserId>> = None;
    let mut source: Source<T> = None;

    loop {
        let active = accounts
            .borrow_and_update()
            .as_ref()
            .map(|account| account.id.clone());

        if following.as_ref() != Some(&active) {
            debug!(key = %definition.build_cache_key(), user = ?active, "active user changed");
            state.clear();
            combined.clear();
            source = match &active {
                Some(user_id) => match users.get(user_id, &definition) {
                    Ok(handle) => Some((user_id.clone(), handle.state())),
                    Err(e) => {
                        error!(user = %user_id, error = %e, "failed to open active user state");
                        None
                    }
                },
                None => None,
            };
            following = Some(active);
        }

        tokio::select! {
            _ = &mut shutdown => break,
            changed = accounts.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            value = next_from(&mut source) => match value {
                Some((user_id, value)) => {
                    state.publish(value.clone());
                    combined.publish((user_id, value));
                }
                None => source = None,
            },
        }
    }
}

//! Account service
//!
//! The state layer only consumes the active-account stream. The default
//! implementation keeps the account list and the active pointer in global
//! state, so they persist through the same storage backends as everything
//! else.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use super::types::{Account, AccountInfo, AuthStatus, UserId};
use crate::core_state::definition::state_definitions::ACCOUNT_DISK;
use crate::core_state::definition::KeyDefinition;
use crate::core_state::errors::{StateError, StateResult};
use crate::core_state::provider::GlobalStateProvider;
use crate::core_state::state::GlobalState;
use crate::core_state::stream::StateStream;
use crate::core_state::update_options::UpdateOptions;

pub type AccountsRecord = BTreeMap<UserId, AccountInfo>;

/// Source of the signed-in account
pub trait AccountService: Send + Sync {
    /// Latest active account; `None` when nobody is signed in
    fn active_account(&self) -> watch::Receiver<Option<Account>>;
}

/// `account/accounts`: every known account keyed by id
pub fn accounts_key() -> KeyDefinition<AccountsRecord> {
    KeyDefinition::new(ACCOUNT_DISK, "accounts", AccountsRecord::new())
}

/// `account/activeAccountId`: the signed-in account, if any
pub fn active_account_id_key() -> KeyDefinition<Option<UserId>> {
    KeyDefinition::new(ACCOUNT_DISK, "activeAccountId", None)
}

/// Account service backed by global state
pub struct DefaultAccountService {
    accounts: Arc<GlobalState<AccountsRecord>>,
    active_id: Arc<GlobalState<Option<UserId>>>,
    active: Arc<watch::Sender<Option<Account>>>,
    _shutdown: oneshot::Sender<()>,
}

impl DefaultAccountService {
    pub fn new(global: &GlobalStateProvider) -> StateResult<Self> {
        let accounts = global.get(&accounts_key())?;
        let active_id = global.get(&active_account_id_key())?;
        let (active, _) = watch::channel(None);
        let active = Arc::new(active);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(track_active_account(
            accounts.state(),
            active_id.state(),
            Arc::clone(&active),
            shutdown_rx,
        ));

        Ok(DefaultAccountService {
            accounts,
            active_id,
            active,
            _shutdown: shutdown_tx,
        })
    }

    /// Add or replace an account
    pub async fn add_account(&self, user_id: UserId, info: AccountInfo) -> StateResult<()> {
        debug!(user = %user_id, "adding account");
        self.accounts
            .update(move |mut accounts| {
                accounts.insert(user_id, info);
                accounts
            })
            .await?;
        self.republish().await
    }

    /// Change the auth status of a known account
    pub async fn set_account_status(&self, user_id: &UserId, status: AuthStatus) -> StateResult<()> {
        let id = user_id.clone();
        let known = user_id.clone();
        let accounts = self
            .accounts
            .update_with(
                move |mut accounts, _: Option<()>| {
                    if let Some(info) = accounts.get_mut(&id) {
                        info.status = status;
                    }
                    accounts
                },
                UpdateOptions::new().with_should_update(move |accounts: &AccountsRecord, _| {
                    accounts.get(&known).map_or(false, |info| info.status != status)
                }),
            )
            .await?;

        if !accounts.contains_key(user_id) {
            return Err(StateError::UnknownAccount(user_id.clone()));
        }
        self.republish().await
    }

    /// Make `user_id` the active account, or sign everyone out with `None`
    pub async fn switch_account(&self, user_id: Option<UserId>) -> StateResult<()> {
        if let Some(id) = &user_id {
            if !self.accounts.get_from_state().await?.contains_key(id) {
                return Err(StateError::UnknownAccount(id.clone()));
            }
        }

        info!(user = ?user_id, "switching active account");
        self.active_id.update(move |_| user_id).await?;
        self.republish().await
    }

    /// Forget an account. Clears the active pointer if it was active.
    pub async fn remove_account(&self, user_id: &UserId) -> StateResult<()> {
        let id = user_id.clone();
        self.accounts
            .update(move |mut accounts| {
                accounts.remove(&id);
                accounts
            })
            .await?;

        let removed = user_id.clone();
        self.active_id
            .update_with(
                |_, _: Option<()>| None,
                UpdateOptions::new()
                    .with_should_update(move |active: &Option<UserId>, _| active.as_ref() == Some(&removed)),
            )
            .await?;
        self.republish().await
    }

    /// Every known account
    pub async fn accounts(&self) -> StateResult<AccountsRecord> {
        self.accounts.get_from_state().await
    }

    /// Stream of the accounts record
    pub fn accounts_state(&self) -> StateStream<AccountsRecord> {
        self.accounts.state()
    }

    async fn republish(&self) -> StateResult<()> {
        let accounts = self.accounts.get_from_state().await?;
        let active_id = self.active_id.get_from_state().await?;
        publish(&self.active, resolve(&accounts, active_id.as_ref()));
        Ok(())
    }
}

impl AccountService for DefaultAccountService {
    fn active_account(&self) -> watch::Receiver<Option<Account>> {
        self.active.subscribe()
    }
}

impl fmt::Debug for DefaultAccountService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultAccountService")
            .field("active", &*self.active.borrow())
            .finish()
    }
}

fn resolve(accounts: &AccountsRecord, active_id: Option<&UserId>) -> Option<Account> {
    let id = active_id?;
    accounts
        .get(id)
        .map(|info| Account::new(id.clone(), info.clone()))
}

fn publish(active: &watch::Sender<Option<Account>>, next: Option<Account>) {
    active.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}

async fn track_active_account(
    mut accounts: StateStream<AccountsRecord>,
    mut active_id: StateStream<Option<UserId>>,
    active: Arc<watch::Sender<Option<Account>>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut latest_accounts: Option<AccountsRecord> = None;
    let mut latest_id: Option<Option<UserId>> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            next = accounts.next() => match next {
                Some(record) => latest_accounts = Some(record),
                None => break,
            },
            next = active_id.next() => match next {
                Some(id) => latest_id = Some(id),
                None => break,
            },
        }

        if let (Some(record), Some(id)) = (&latest_accounts, &latest_id) {
            publish(&active, resolve(record, id.as_ref()));
        }
    }
}

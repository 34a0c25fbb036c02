/*
    types.rs - Account identity and status

    Defines:
    - UserId, the opaque account identifier used in user-scoped storage keys
    - AuthStatus, the lock/unlock lifecycle of an account
    - AccountInfo and Account, what the account service publishes
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an account
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    /// Generate a new random account id
    pub fn generate() -> Self {
        UserId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_string())
    }
}

/// Authentication status of an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthStatus {
    #[default]
    LoggedOut,
    Locked,
    Unlocked,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthStatus::LoggedOut => f.write_str("logged out"),
            AuthStatus::Locked => f.write_str("locked"),
            AuthStatus::Unlocked => f.write_str("unlocked"),
        }
    }
}

/// What is known about an account besides its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub status: AuthStatus,
    pub email: String,
    pub name: Option<String>,
}

impl AccountInfo {
    pub fn new(email: impl Into<String>, status: AuthStatus) -> Self {
        AccountInfo {
            status,
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// An account together with its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    #[serde(flatten)]
    pub info: AccountInfo,
}

impl Account {
    pub fn new(id: UserId, info: AccountInfo) -> Self {
        Account { id, info }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = UserId::generate();
        let b = UserId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_user_id_serializes_as_string() {
        let id = UserId::new("00000000-0000-1000-a000-000000000001");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json, serde_json::json!("00000000-0000-1000-a000-000000000001"));
    }

    #[test]
    fn test_account_info_shape() {
        let info = AccountInfo::new("user@example.com", AuthStatus::Unlocked).with_name("User");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "unlocked");
        assert_eq!(json["email"], "user@example.com");
        assert_eq!(json["name"], "User");
    }

    #[test]
    fn test_default_status_is_logged_out() {
        assert_eq!(AuthStatus::default(), AuthStatus::LoggedOut);
    }
}

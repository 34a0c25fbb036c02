//! Application-wide state domains
//!
//! Every domain the client stores data under is declared here, and every
//! key the crate itself defines is listed in [`all_key_definitions`], so that
//! name collisions are caught by a single test instead of at runtime.

use super::key_definition::KeyCoordinates;
use super::state_definition::{StateDefinition, StorageLocation};
use crate::core_account::{accounts_key, active_account_id_key};

// Platform
pub const ACCOUNT_DISK: StateDefinition = StateDefinition::new("account", StorageLocation::Disk);
pub const ACCOUNT_MEMORY: StateDefinition = StateDefinition::new("account", StorageLocation::Memory);
pub const CLEAR_EVENT_DISK: StateDefinition = StateDefinition::new("clearEvent", StorageLocation::Disk);
pub const CONFIG_DISK: StateDefinition = StateDefinition::new("config", StorageLocation::Disk);
pub const CRYPTO_DISK: StateDefinition = StateDefinition::new("crypto", StorageLocation::Disk);
pub const CRYPTO_MEMORY: StateDefinition = StateDefinition::new("crypto", StorageLocation::Memory);
pub const BIOMETRIC_SETTINGS_DISK: StateDefinition =
    StateDefinition::new("biometricSettings", StorageLocation::Disk);
pub const ENVIRONMENT_DISK: StateDefinition = StateDefinition::new("environment", StorageLocation::Disk);

// Auth
pub const MASTER_PASSWORD_MEMORY: StateDefinition =
    StateDefinition::new("masterPassword", StorageLocation::Memory);
pub const MASTER_PASSWORD_DISK: StateDefinition = StateDefinition::new("masterPassword", StorageLocation::Disk);
pub const TOKEN_DISK: StateDefinition = StateDefinition::new("token", StorageLocation::Disk);
pub const TOKEN_SECURE: StateDefinition = StateDefinition::new("token", StorageLocation::Secure);
pub const TWO_FACTOR_DISK: StateDefinition = StateDefinition::new("twoFactor", StorageLocation::Disk);

// Admin console
pub const POLICIES_DISK: StateDefinition = StateDefinition::new("policies", StorageLocation::Disk);
pub const ORGANIZATIONS_DISK: StateDefinition = StateDefinition::new("organizations", StorageLocation::Disk);

// Tools
pub const GENERATOR_DISK: StateDefinition = StateDefinition::new("generator", StorageLocation::Disk);
pub const GENERATOR_MEMORY: StateDefinition = StateDefinition::new("generator", StorageLocation::Memory);
pub const SEND_DISK: StateDefinition = StateDefinition::new("encryptedSend", StorageLocation::Disk);
pub const SEND_MEMORY: StateDefinition = StateDefinition::new("decryptedSend", StorageLocation::Memory);

// Vault
pub const FOLDER_DISK: StateDefinition = StateDefinition::new("folder", StorageLocation::Disk);
pub const FOLDER_MEMORY: StateDefinition = StateDefinition::new("decryptedFolders", StorageLocation::Memory);
pub const CIPHERS_DISK: StateDefinition = StateDefinition::new("ciphers", StorageLocation::Disk);
pub const CIPHERS_MEMORY: StateDefinition = StateDefinition::new("ciphersMemory", StorageLocation::Memory);
pub const VAULT_SETTINGS_DISK: StateDefinition = StateDefinition::new("vaultSettings", StorageLocation::Disk);

/// Every domain declared above
pub fn all_state_definitions() -> Vec<StateDefinition> {
    vec![
        ACCOUNT_DISK,
        ACCOUNT_MEMORY,
        CLEAR_EVENT_DISK,
        CONFIG_DISK,
        CRYPTO_DISK,
        CRYPTO_MEMORY,
        BIOMETRIC_SETTINGS_DISK,
        ENVIRONMENT_DISK,
        MASTER_PASSWORD_MEMORY,
        MASTER_PASSWORD_DISK,
        TOKEN_DISK,
        TOKEN_SECURE,
        TWO_FACTOR_DISK,
        POLICIES_DISK,
        ORGANIZATIONS_DISK,
        GENERATOR_DISK,
        GENERATOR_MEMORY,
        SEND_DISK,
        SEND_MEMORY,
        FOLDER_DISK,
        FOLDER_MEMORY,
        CIPHERS_DISK,
        CIPHERS_MEMORY,
        VAULT_SETTINGS_DISK,
    ]
}

/// Every key definition the application itself declares
pub fn all_key_definitions() -> Vec<KeyCoordinates> {
    vec![
        accounts_key().coordinates(),
        active_account_id_key().coordinates(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_location_and_name_pairs_are_unique() {
        let mut seen = HashSet::new();
        for def in all_state_definitions() {
            assert!(
                seen.insert((def.storage_location(), def.name())),
                "duplicate state definition {}",
                def
            );
        }
    }

    #[test]
    fn test_application_cache_keys_are_unique() {
        let mut seen = HashSet::new();
        for key in all_key_definitions() {
            let cache_key = key.build_cache_key();
            assert!(seen.insert(cache_key.clone()), "duplicate cache key {}", cache_key);
        }
    }

    #[test]
    fn test_application_keys_use_declared_domains() {
        let domains = all_state_definitions();
        for key in all_key_definitions() {
            assert!(
                domains.contains(&key.state_definition),
                "{} lives in an undeclared domain",
                key.build_cache_key()
            );
        }
    }

    #[test]
    fn test_names_are_not_shared_case_insensitively() {
        // A name may appear once per location, but two distinct names must not
        // differ only by case.
        let mut by_lower: std::collections::HashMap<String, &'static str> = Default::default();
        for def in all_state_definitions() {
            let lower = def.name().to_lowercase();
            if let Some(existing) = by_lower.insert(lower, def.name()) {
                assert_eq!(existing, def.name(), "names differ only by case: {}", def.name());
            }
        }
    }
}

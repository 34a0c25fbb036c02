//! Test utilities for VaultState
//!
//! A controllable storage backend and stream helpers shared by unit and
//! integration tests.

pub mod async_helpers;
pub mod fake_storage;

pub use async_helpers::*;
pub use fake_storage::FakeStorageService;

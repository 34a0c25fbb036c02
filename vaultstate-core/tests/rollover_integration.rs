/*
    Rollover Integration Tests

    Tests staged migrations into a user's output state:
    - a staged payload is applied exactly once and the staging slot emptied
    - invalid payloads are discarded without touching the output
    - a closed gate holds the payload until the dependency opens it
    - racing observers of the same slot drain once
*/

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use vaultstate_core::core_account::UserId;
use vaultstate_core::core_state::definition::state_definitions::GENERATOR_DISK;
use vaultstate_core::core_state::storage::{MemoryStorageService, StorageServiceProvider};
use vaultstate_core::core_state::stream::{StateSource, StateSubject};
use vaultstate_core::test_utils::{
    assert_completes_within, assert_no_emission, next_value, FakeStorageService, DEFAULT_TEST_TIMEOUT,
    SHORT_TEST_TIMEOUT,
};
use vaultstate_core::{Config, KeyDefinition, RolloverKeyDefinition, StateError, StateProvider};

const STAGING_SLOT: &str = "user_alice_generator_pendingPassphrase";
const OUTPUT_SLOT: &str = "user_alice_generator_passphrase";

fn setup() -> (StateProvider, Arc<FakeStorageService>) {
    let disk = Arc::new(FakeStorageService::new());
    let storage = StorageServiceProvider::new(
        disk.clone(),
        Arc::new(MemoryStorageService::new()),
        Arc::new(MemoryStorageService::new()),
    );
    let (provider, _accounts) = StateProvider::with_default_accounts(storage, &Config::default()).unwrap();
    (provider, disk)
}

fn output_key() -> KeyDefinition<String> {
    KeyDefinition::new(GENERATOR_DISK, "passphrase", String::new())
}

fn counting_definition(calls: &Arc<AtomicUsize>) -> RolloverKeyDefinition<String, String> {
    let calls = Arc::clone(calls);
    RolloverKeyDefinition::<String>::new(GENERATOR_DISK, "pendingPassphrase").with_map(
        move |staged: String, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(staged.to_uppercase()) }
        },
    )
}

#[tokio::test]
async fn test_staged_payload_applied_once() {
    let (provider, disk) = setup();
    let alice = UserId::new("alice");
    let calls = Arc::new(AtomicUsize::new(0));
    let rollover = provider
        .get_rollover(&alice, &counting_definition(&calls), &output_key())
        .unwrap();

    rollover.rollover(Some("correct horse".to_string())).await.unwrap();
    assert_eq!(disk.peek(OUTPUT_SLOT).await, None);

    let mut state = rollover.state();
    let value = assert_completes_within(DEFAULT_TEST_TIMEOUT, state.wait_for(|v| v == "CORRECT HORSE"))
        .await
        .unwrap();
    assert_eq!(value, "CORRECT HORSE");

    let mut input = rollover.input_state();
    assert_completes_within(DEFAULT_TEST_TIMEOUT, input.wait_for(|staged| staged.is_none())).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(disk.peek(STAGING_SLOT).await, None);
    assert_eq!(disk.peek(OUTPUT_SLOT).await, Some(json!("CORRECT HORSE")));

    // A second observer finds nothing left to drain
    let mut again = rollover.state();
    assert_eq!(next_value(&mut again).await, "CORRECT HORSE");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_payload_discarded() {
    let (provider, disk) = setup();
    let alice = UserId::new("alice");
    let definition = RolloverKeyDefinition::<String>::new(GENERATOR_DISK, "pendingPassphrase")
        .with_is_valid(|staged: String, _| async move { staged.starts_with("signed:") });
    let rollover = provider.get_rollover(&alice, &definition, &output_key()).unwrap();

    rollover.rollover(Some("tampered".to_string())).await.unwrap();
    let mut input = rollover.input_state();
    let mut state = rollover.state();

    assert_completes_within(DEFAULT_TEST_TIMEOUT, input.wait_for(|staged| staged.is_none())).await;
    assert_eq!(next_value(&mut state).await, "");
    assert_eq!(disk.peek(STAGING_SLOT).await, None);
    assert_eq!(disk.peek(OUTPUT_SLOT).await, None);
}

#[tokio::test]
async fn test_gate_holds_payload_until_dependency_opens() {
    let (provider, disk) = setup();
    let alice = UserId::new("alice");
    let unlocked = Arc::new(StateSubject::new(false));
    let definition = RolloverKeyDefinition::<String, String, bool>::new(GENERATOR_DISK, "pendingPassphrase")
        .with_should_rollover(|unlocked| *unlocked);
    let rollover = provider
        .get_rollover_with(
            &alice,
            &definition,
            &output_key(),
            unlocked.clone() as Arc<dyn StateSource<bool>>,
        )
        .unwrap();

    rollover.rollover(Some("staged".to_string())).await.unwrap();
    let mut state = rollover.state();
    assert_eq!(next_value(&mut state).await, "");
    assert_no_emission(&mut state, SHORT_TEST_TIMEOUT).await;
    assert_eq!(disk.peek(STAGING_SLOT).await, Some(json!("staged")));

    unlocked.next(true);
    let value = assert_completes_within(DEFAULT_TEST_TIMEOUT, state.wait_for(|v| v == "staged"))
        .await
        .unwrap();
    assert_eq!(value, "staged");

    let mut input = rollover.input_state();
    assert_completes_within(DEFAULT_TEST_TIMEOUT, input.wait_for(|staged| staged.is_none())).await;
    assert_eq!(disk.peek(STAGING_SLOT).await, None);
}

#[tokio::test]
async fn test_racing_observers_drain_once() {
    let (provider, _disk) = setup();
    let alice = UserId::new("alice");
    let calls = Arc::new(AtomicUsize::new(0));
    let definition = counting_definition(&calls);

    let first = provider.get_rollover(&alice, &definition, &output_key()).unwrap();
    let second = provider.get_rollover(&alice, &definition, &output_key()).unwrap();
    first.rollover(Some("abc".to_string())).await.unwrap();

    let mut a = first.state();
    let mut b = second.state();
    let (x, y) = tokio::join!(
        assert_completes_within(DEFAULT_TEST_TIMEOUT, a.wait_for(|v| v == "ABC")),
        assert_completes_within(DEFAULT_TEST_TIMEOUT, b.wait_for(|v| v == "ABC")),
    );

    assert_eq!(x.as_deref(), Some("ABC"));
    assert_eq!(y.as_deref(), Some("ABC"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rollover_none_is_ignored() {
    let (provider, disk) = setup();
    let alice = UserId::new("alice");
    let rollover = provider
        .get_rollover(
            &alice,
            &RolloverKeyDefinition::<String>::new(GENERATOR_DISK, "pendingPassphrase"),
            &output_key(),
        )
        .unwrap();

    let saves = disk.save_calls();
    rollover.rollover(None).await.unwrap();

    assert_eq!(disk.save_calls(), saves);
    assert_eq!(disk.peek(STAGING_SLOT).await, None);
}

#[tokio::test]
async fn test_pending_payload_visible_before_observation() {
    let (provider, disk) = setup();
    let alice = UserId::new("alice");
    let rollover = provider
        .get_rollover(
            &alice,
            &RolloverKeyDefinition::<String>::new(GENERATOR_DISK, "pendingPassphrase"),
            &output_key(),
        )
        .unwrap();

    rollover.rollover(Some("later".to_string())).await.unwrap();

    let mut input = rollover.input_state();
    assert_eq!(next_value(&mut input).await, Some("later".to_string()));
    assert_eq!(disk.peek(OUTPUT_SLOT).await, None);
}

#[tokio::test]
async fn test_update_writes_output_directly() {
    let (provider, disk) = setup();
    let alice = UserId::new("alice");
    let rollover = provider
        .get_rollover(
            &alice,
            &RolloverKeyDefinition::<String>::new(GENERATOR_DISK, "pendingPassphrase"),
            &output_key(),
        )
        .unwrap();

    let value = rollover.update(|_| "direct".to_string()).await.unwrap();
    assert_eq!(value, "direct");
    assert_eq!(disk.peek(OUTPUT_SLOT).await, Some(json!("direct")));
    assert_eq!(disk.peek(STAGING_SLOT).await, None);

    let output = provider.get_user(&alice, &output_key()).unwrap();
    assert_eq!(output.get_from_state().await.unwrap(), "direct");
}

#[tokio::test]
async fn test_failed_map_keeps_payload_staged() {
    let (provider, disk) = setup();
    let alice = UserId::new("alice");
    let definition = RolloverKeyDefinition::<String>::new(GENERATOR_DISK, "pendingPassphrase").with_map(
        |_: String, _| async move {
            Err::<String, _>(StateError::derive("pendingPassphrase", "decrypt failed"))
        },
    );
    let rollover = provider.get_rollover(&alice, &definition, &output_key()).unwrap();

    rollover.rollover(Some("opaque".to_string())).await.unwrap();
    let mut state = rollover.state();

    assert_eq!(next_value(&mut state).await, "");
    assert_eq!(disk.peek(STAGING_SLOT).await, Some(json!("opaque")));
    assert_eq!(disk.peek(OUTPUT_SLOT).await, None);
}

//! Replay-of-one value streams
//!
//! Every state handle publishes through a [`StateCell`]: a
//! `tokio::sync::watch` slot holding the latest value (`None` until the
//! first one is known) paired with a `tokio::sync::broadcast` feed of every
//! published value. Subscribers get a [`StateStream`], which replays the
//! latest value on its first `next()` and then yields every later publish in
//! order. A stream that falls more than [`CHANGE_BUFFER`] values behind
//! skips to the oldest value still buffered.

use std::fmt;
use tokio::sync::{broadcast, watch};
use tracing::warn;

/// Values buffered per subscriber before it starts skipping
pub const CHANGE_BUFFER: usize = 128;

/// Anything that can hand out value streams
pub trait StateSource<T>: Send + Sync {
    fn subscribe(&self) -> StateStream<T>;
}

/// Runs a release hook when the owning stream is dropped
pub(crate) struct Lease {
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl Lease {
    pub(crate) fn new(on_release: impl FnOnce() + Send + 'static) -> Self {
        Lease {
            on_release: Some(Box::new(on_release)),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

/// Latest value and the publish count that produced it
#[derive(Debug, Clone)]
struct Slot<T> {
    version: u64,
    value: Option<T>,
}

/// The publishing side of a state: a replay slot plus an ordered change feed
pub(crate) struct StateCell<T> {
    latest: watch::Sender<Slot<T>>,
    changes: broadcast::Sender<(u64, T)>,
}

impl<T: Clone> StateCell<T> {
    pub(crate) fn new(initial: Option<T>) -> Self {
        let (latest, _) = watch::channel(Slot {
            version: 0,
            value: initial,
        });
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        StateCell { latest, changes }
    }

    /// Publish `value` to the slot and the change feed
    pub(crate) fn publish(&self, value: T) {
        self.publish_if(value, |_, _| true);
    }

    /// Publish `value` when `differs(current, value)` holds. Returns whether
    /// it was published.
    pub(crate) fn publish_if(&self, value: T, differs: impl FnOnce(Option<&T>, &T) -> bool) -> bool {
        let changes = &self.changes;
        // The feed is written under the slot's lock so versions reach it in order
        self.latest.send_if_modified(|slot| {
            if !differs(slot.value.as_ref(), &value) {
                return false;
            }
            slot.version += 1;
            // No receivers is not an error; late subscribers replay the slot
            let _ = changes.send((slot.version, value.clone()));
            slot.value = Some(value);
            true
        })
    }

    /// Drop the replay value. Nothing is sent on the change feed.
    pub(crate) fn clear(&self) {
        self.latest.send_modify(|slot| {
            slot.version += 1;
            slot.value = None;
        });
    }

    /// Current value
    pub(crate) fn get(&self) -> Option<T> {
        self.latest.borrow().value.clone()
    }

    pub(crate) fn subscribe(&self) -> StateStream<T> {
        StateStream {
            latest: self.latest.subscribe(),
            changes: self.changes.subscribe(),
            seen: None,
            _lease: None,
        }
    }

    /// Resolves once every stream of this cell is dropped
    pub(crate) async fn closed(&self) {
        self.latest.closed().await
    }
}

/// A subscription to a state's values
pub struct StateStream<T> {
    latest: watch::Receiver<Slot<T>>,
    changes: broadcast::Receiver<(u64, T)>,
    // Version of the replayed slot; feed entries at or below it are stale
    seen: Option<u64>,
    _lease: Option<Lease>,
}

impl<T: Clone> StateStream<T> {
    /// Attach a hook that runs when this stream is dropped
    pub(crate) fn leased(mut self, lease: Lease) -> Self {
        self._lease = Some(lease);
        self
    }

    /// A stream that yields `value` once and then ends
    pub fn constant(value: T) -> Self {
        StateCell::new(Some(value)).subscribe()
    }

    /// Next value. The first call replays the latest value when one exists;
    /// later calls yield every publish in order. `None` once the source is
    /// gone.
    pub async fn next(&mut self) -> Option<T> {
        let seen = match self.seen {
            Some(seen) => seen,
            None => {
                let slot = self.latest.borrow_and_update().clone();
                self.seen = Some(slot.version);
                if let Some(value) = slot.value {
                    return Some(value);
                }
                slot.version
            }
        };

        loop {
            match self.changes.recv().await {
                Ok((version, value)) if version > seen => {
                    self.seen = Some(version);
                    return Some(value);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "State stream fell behind, skipping to oldest buffered value");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the first value accepted by `predicate`
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<T> {
        loop {
            let value = self.next().await?;
            if predicate(&value) {
                return Some(value);
            }
        }
    }

    /// Latest value without waiting
    pub fn latest(&self) -> Option<T> {
        self.latest.borrow().value.clone()
    }

    /// Project every value through `f`
    ///
    /// The projection runs on a spawned task that lives until the source
    /// ends or every receiver of the mapped stream is gone.
    pub fn map<U, F>(mut self, f: F) -> StateStream<U>
    where
        T: Send + Sync + 'static,
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + 'static,
    {
        let slot = self.latest.borrow_and_update().clone();
        self.seen = Some(slot.version);
        let cell = StateCell::new(slot.value.map(&f));
        let mapped = cell.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cell.closed() => break,
                    value = self.next() => match value {
                        Some(value) => cell.publish(f(value)),
                        None => break,
                    },
                }
            }
        });

        mapped
    }
}

impl<T> fmt::Debug for StateStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream")
            .field("seen", &self.seen)
            .field("leased", &self._lease.is_some())
            .finish()
    }
}

/// A value holder callers can push into; the stream equivalent of a
/// behaviour subject. Handy as an update dependency or a rollover gate.
pub struct StateSubject<T> {
    cell: StateCell<T>,
}

impl<T: Clone + Send + Sync> StateSubject<T> {
    /// Subject holding `value`
    pub fn new(value: T) -> Self {
        StateSubject {
            cell: StateCell::new(Some(value)),
        }
    }

    /// Subject with no value yet; subscribers wait for the first `next`
    pub fn empty() -> Self {
        StateSubject {
            cell: StateCell::new(None),
        }
    }

    /// Publish a value
    pub fn next(&self, value: T) {
        self.cell.publish(value);
    }

    /// Current value
    pub fn value(&self) -> Option<T> {
        self.cell.get()
    }
}

impl<T: Clone + Send + Sync> StateSource<T> for StateSubject<T> {
    fn subscribe(&self) -> StateStream<T> {
        self.cell.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_next_replays_latest() {
        let subject = StateSubject::new(1);
        subject.next(2);
        let mut stream = subject.subscribe();
        assert_eq!(stream.next().await, Some(2));
    }

    #[tokio::test]
    async fn test_next_waits_for_change() {
        let subject = Arc::new(StateSubject::new("a".to_string()));
        let mut stream = subject.subscribe();
        assert_eq!(stream.next().await.as_deref(), Some("a"));

        let publisher = Arc::clone(&subject);
        tokio::spawn(async move { publisher.next("b".to_string()) });

        assert_eq!(stream.next().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_empty_subject_skips_none() {
        let subject = Arc::new(StateSubject::<u8>::empty());
        let mut stream = subject.subscribe();
        assert_eq!(stream.latest(), None);

        let publisher = Arc::clone(&subject);
        tokio::spawn(async move { publisher.next(9) });
        assert_eq!(stream.next().await, Some(9));
    }

    #[tokio::test]
    async fn test_burst_is_delivered_in_order() {
        let subject = StateSubject::new(1);
        let mut stream = subject.subscribe();
        assert_eq!(stream.next().await, Some(1));

        for value in 2..=4 {
            subject.next(value);
        }
        assert_eq!(stream.next().await, Some(2));
        assert_eq!(stream.next().await, Some(3));
        assert_eq!(stream.next().await, Some(4));
    }

    #[tokio::test]
    async fn test_publishes_before_first_next_collapse_into_replay() {
        let subject = StateSubject::new(1);
        let mut stream = subject.subscribe();
        subject.next(2);
        subject.next(3);

        assert_eq!(stream.next().await, Some(3));
        subject.next(4);
        assert_eq!(stream.next().await, Some(4));
    }

    #[tokio::test]
    async fn test_cleared_cell_is_skipped_until_next_publish() {
        let cell = StateCell::new(Some(1));
        let mut stream = cell.subscribe();
        assert_eq!(stream.next().await, Some(1));

        cell.clear();
        assert_eq!(stream.latest(), None);
        cell.publish(2);
        assert_eq!(stream.next().await, Some(2));
    }

    #[test]
    fn test_publish_if_respects_predicate() {
        let cell = StateCell::new(Some(5u32));
        assert!(!cell.publish_if(5, |current, value| current != Some(value)));
        assert!(cell.publish_if(6, |current, value| current != Some(value)));
        assert_eq!(cell.get(), Some(6));
    }

    #[tokio::test]
    async fn test_constant_yields_once() {
        let mut stream = StateStream::constant(5);
        assert_eq!(stream.next().await, Some(5));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_wait_for_predicate() {
        let subject = Arc::new(StateSubject::new(0));
        let mut stream = subject.subscribe();
        let publisher = Arc::clone(&subject);
        tokio::spawn(async move {
            for i in 1..=5 {
                publisher.next(i);
                tokio::task::yield_now().await;
            }
        });
        assert_eq!(stream.wait_for(|v| *v >= 5).await, Some(5));
    }

    #[tokio::test]
    async fn test_map_projects_values() {
        let subject = Arc::new(StateSubject::new(2));
        let mut doubled = subject.subscribe().map(|v| v * 2);
        assert_eq!(doubled.next().await, Some(4));

        subject.next(5);
        assert_eq!(doubled.next().await, Some(10));
    }

    #[test]
    fn test_lease_runs_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let cell = StateCell::new(Some(1));
        let stream = cell.subscribe().leased(Lease::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(!released.load(Ordering::SeqCst));
        drop(stream);
        assert!(released.load(Ordering::SeqCst));
    }
}

//! Async test helpers
//!
//! Timeouts around state streams so a broken emission fails a test instead
//! of hanging it.

use std::future::Future;
use tokio::time::{timeout, Duration};

use crate::core_state::stream::StateStream;

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for asserting that nothing happens (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamWaitError {
    Timeout,
    Closed,
}

impl std::fmt::Display for StreamWaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamWaitError::Timeout => write!(f, "stream did not emit in time"),
            StreamWaitError::Closed => write!(f, "stream closed"),
        }
    }
}

impl std::error::Error for StreamWaitError {}

/// Next value of a state stream, bounded by `duration`
pub async fn next_within<T: Clone>(
    stream: &mut StateStream<T>,
    duration: Duration,
) -> Result<T, StreamWaitError> {
    timeout(duration, stream.next())
        .await
        .map_err(|_| StreamWaitError::Timeout)?
        .ok_or(StreamWaitError::Closed)
}

/// Next value, panicking after [`DEFAULT_TEST_TIMEOUT`]
pub async fn next_value<T: Clone + std::fmt::Debug>(stream: &mut StateStream<T>) -> T {
    match next_within(stream, DEFAULT_TEST_TIMEOUT).await {
        Ok(value) => value,
        Err(e) => panic!("expected a value: {}", e),
    }
}

/// Assert that a stream stays quiet for `duration`
pub async fn assert_no_emission<T: Clone + std::fmt::Debug>(stream: &mut StateStream<T>, duration: Duration) {
    if let Ok(Some(value)) = timeout(duration, stream.next()).await {
        panic!("expected no emission within {:?}, got {:?}", duration, value);
    }
}

/// Helper to assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_state::stream::{StateSource, StateSubject};

    #[tokio::test]
    async fn test_next_within_success() {
        let subject = StateSubject::new(42);
        let mut stream = subject.subscribe();
        assert_eq!(next_within(&mut stream, DEFAULT_TEST_TIMEOUT).await, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_within_times_out() {
        let subject = StateSubject::<i32>::empty();
        let mut stream = subject.subscribe();
        assert_eq!(
            next_within(&mut stream, SHORT_TEST_TIMEOUT).await,
            Err(StreamWaitError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_next_within_closed() {
        let mut stream = StateStream::constant(1);
        assert_eq!(next_value(&mut stream).await, 1);
        assert_eq!(
            next_within(&mut stream, DEFAULT_TEST_TIMEOUT).await,
            Err(StreamWaitError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_no_emission_after_replay() {
        let subject = StateSubject::new("quiet");
        let mut stream = subject.subscribe();
        assert_eq!(next_value(&mut stream).await, "quiet");
        assert_no_emission(&mut stream, SHORT_TEST_TIMEOUT).await;
    }
}

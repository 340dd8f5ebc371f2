//! Where backoff waits actually happen.
//!
//! Retry loops never call `tokio::time::sleep` directly; they go through a [`Sleeper`] so tests can
//! skip or record the waits.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Suspends the calling task for a duration.
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Real timer-backed sleeper.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantSleeper;

impl Sleeper for InstantSleeper {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

/// Records every requested wait and returns immediately.
///
/// Clones share the same log, so a test can keep one handle and give the other to a policy.
#[derive(Debug, Default, Clone)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All waits requested so far, in order.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sum of all requested waits.
    pub fn total(&self) -> Duration {
        self.waits().into_iter().sum()
    }

    pub fn clear(&self) {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sleeper_logs_in_order() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_millis(100)).await;
        sleeper.sleep(Duration::from_millis(200)).await;

        assert_eq!(sleeper.waits(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
        assert_eq!(sleeper.total(), Duration::from_millis(300));

        sleeper.clear();
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn clones_share_the_log() {
        let sleeper = RecordingSleeper::new();
        let handle = sleeper.clone();
        sleeper.sleep(Duration::from_millis(5)).await;
        assert_eq!(handle.waits().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_advances_time() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(250)).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn instant_sleeper_returns_immediately() {
        let start = std::time::Instant::now();
        InstantSleeper.sleep(Duration::from_secs(30)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

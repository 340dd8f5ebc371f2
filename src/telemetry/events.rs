use std::fmt;
use std::time::Duration;

/// Structured events emitted by the retry engine, the self-healing store and the TTL cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Retry(RetryEvent),
    Store(StoreEvent),
    Cache(CacheEvent),
}

/// Events emitted by [`RetryPolicy`](crate::RetryPolicy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retryable failure occurred; the engine will wait `delay` and try again.
    Attempt {
        /// 1-indexed number of the attempt that just failed
        attempt: usize,
        delay: Duration,
    },
    /// A non-retryable failure ended the call.
    Aborted { attempt: usize, reason: String },
    /// Every permitted attempt failed.
    Exhausted { total_attempts: usize, total_duration: Duration },
    /// The cancellation token fired.
    Cancelled { attempts: usize },
}

/// Events emitted by [`SelfHealingStore`](crate::SelfHealingStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Corrupted data for `key` was repaired by `strategy`.
    Repaired { key: String, strategy: &'static str },
    /// Corrupted data for `key` could not be repaired and was overwritten with the fallback.
    ReplacedWithFallback { key: String },
    /// A storage operation failed and will be retried.
    IoRetry { key: String, attempt: usize, error: String },
    /// A storage operation exhausted its retries.
    IoFailed { key: String, attempts: usize, error: String },
}

/// Events emitted by [`TtlCache`](crate::TtlCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Hit { key: String },
    Miss { key: String },
    /// A read observed an expired entry and evicted it.
    Expired { key: String },
    /// A sweep removed this many expired entries.
    Evicted { count: usize },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Retry(event) => write!(f, "Retry::{}", event),
            Event::Store(event) => write!(f, "Store::{}", event),
            Event::Cache(event) => write!(f, "Cache::{}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Aborted { attempt, reason } => {
                write!(f, "Aborted(#{}, reason={})", attempt, reason)
            }
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(attempts={}, duration={:?})", total_attempts, total_duration)
            }
            RetryEvent::Cancelled { attempts } => write!(f, "Cancelled(attempts={})", attempts),
        }
    }
}

impl fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreEvent::Repaired { key, strategy } => {
                write!(f, "Repaired(key={}, strategy={})", key, strategy)
            }
            StoreEvent::ReplacedWithFallback { key } => {
                write!(f, "ReplacedWithFallback(key={})", key)
            }
            StoreEvent::IoRetry { key, attempt, error } => {
                write!(f, "IoRetry(key={}, #{}, error={})", key, attempt, error)
            }
            StoreEvent::IoFailed { key, attempts, error } => {
                write!(f, "IoFailed(key={}, attempts={}, error={})", key, attempts, error)
            }
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Hit { key } => write!(f, "Hit({})", key),
            CacheEvent::Miss { key } => write!(f, "Miss({})", key),
            CacheEvent::Expired { key } => write!(f, "Expired({})", key),
            CacheEvent::Evicted { count } => write!(f, "Evicted({})", count),
        }
    }
}

#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Lifeline
//!
//! Resilient data-access primitives for async Rust: the pieces a client needs to keep working
//! against a flaky backend and a flaky local disk.
//!
//! ## Components
//!
//! - **Retry engine** ([`RetryPolicy`]): exponential backoff, HTTP-aware retryability
//!   (no response and 5xx retry, 4xx and cancellation do not), cooperative cancellation.
//! - **Self-healing store** ([`SelfHealingStore`]): wraps a [`KeyValueStore`], repairs corrupted
//!   JSON on read, retries transient I/O, and never returns an error to the caller.
//! - **TTL cache** ([`TtlCache`]): lazily-expiring entries persisted through the self-healing
//!   store, with a metadata record recomputed after every mutation.
//!
//! Dependency order, leaves first: retry engine, self-healing store, TTL cache. Each component is
//! constructed once and handed to whoever needs it; there is no global instance.
//!
//! ## Quick Start
//!
//! ```rust
//! use lifeline::{MemoryStore, RetryPolicy, SelfHealingStore, TransportError, TtlCache};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = SelfHealingStore::new(MemoryStore::new());
//!     let cache = TtlCache::new(store);
//!     let policy = RetryPolicy::builder().base_delay(Duration::from_millis(10)).build().unwrap();
//!
//!     let title: String = cache
//!         .get_or_fetch("42", Duration::from_secs(300), &policy, || async {
//!             Ok::<_, TransportError>("desk lamp".to_string())
//!         })
//!         .await
//!         .unwrap();
//!     assert_eq!(title, "desk lamp");
//!     assert_eq!(cache.get::<String>("42").await.as_deref(), Some("desk lamp"));
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod error;
pub mod healing;
pub mod jitter;
pub mod kv;
pub mod prelude;
pub mod repair;
pub mod retry;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use backoff::Backoff;
pub use cache::{CacheEntry, CacheMetadata, TtlCache, TtlCacheBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    BuildError, CacheError, Classify, FailureKind, ResilienceError, StoreError, TransportError,
};
pub use healing::{
    HealthReport, LoadOptions, LoadOutcome, RecommendedAction, SaveOptions, SelfHealingStore,
    WriteOutcome,
};
pub use jitter::Jitter;
pub use kv::{FileStore, KeyValueStore, MemoryStore};
pub use repair::RepairStrategy;
pub use retry::{RetryDecision, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, RecordingSleeper, Sleeper, TokioSleeper};
pub use tokio_util::sync::CancellationToken;

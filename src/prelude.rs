//! Convenient re-exports for common Lifeline types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    cache::{CacheMetadata, TtlCache},
    error::{CacheError, Classify, FailureKind, ResilienceError, StoreError, TransportError},
    healing::{HealthReport, LoadOptions, LoadOutcome, SaveOptions, SelfHealingStore, WriteOutcome},
    jitter::Jitter,
    kv::{KeyValueStore, MemoryStore},
    retry::{RetryPolicy, RetryPolicyBuilder},
    telemetry::{LogSink, MemorySink, Telemetry},
    CancellationToken,
};

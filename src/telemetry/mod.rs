//! Telemetry for the retry engine, the self-healing store and the TTL cache.
//!
//! Components emit structured [`Event`]s through a [`Telemetry`] handle. The handle wraps any
//! [`TelemetrySink`], which is a `tower::Service<Event>`. Emission is best-effort: a sink that is
//! not ready or returns an error never affects control flow.
//!
//! - **Retry**: `Attempt`, `Aborted`, `Exhausted`, `Cancelled`
//! - **Store**: `Repaired`, `ReplacedWithFallback`, `IoRetry`, `IoFailed`
//! - **Cache**: `Hit`, `Miss`, `Expired`, `Evicted`
//!
//! ```rust
//! use lifeline::telemetry::{MemorySink, Telemetry};
//!
//! let sink = MemorySink::with_capacity(1_000);
//! let telemetry = Telemetry::new(sink.clone());
//! assert!(telemetry.is_enabled());
//! assert!(sink.is_empty());
//! ```

pub mod events;
pub mod sinks;

pub use events::{CacheEvent, Event, RetryEvent, StoreEvent};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, Telemetry, TelemetrySink};

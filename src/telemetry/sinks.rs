use super::events::Event;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tower::Service;

/// A telemetry sink that consumes events.
///
/// Sinks are plain `tower::Service<Event>`s, so they compose with standard tower combinators.
pub trait TelemetrySink:
    tower::Service<Event, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
pub async fn emit_best_effort<S>(sink: S, event: Event)
where
    S: tower::Service<Event, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

type EmitFn = dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync;

/// Type-erased, cloneable handle to a sink.
///
/// Components store one of these instead of being generic over the sink type. The default handle
/// drops every event.
#[derive(Clone, Default)]
pub struct Telemetry {
    emit: Option<Arc<EmitFn>>,
}

impl Telemetry {
    /// Handle that discards all events.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new<S>(sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        let emit = move |event: Event| -> BoxFuture<'static, ()> {
            Box::pin(emit_best_effort(sink.clone(), event))
        };
        Self { emit: Some(Arc::new(emit)) }
    }

    pub fn is_enabled(&self) -> bool {
        self.emit.is_some()
    }

    pub async fn emit(&self, event: Event) {
        if let Some(emit) = &self.emit {
            emit(event).await;
        }
    }
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry").field("enabled", &self.is_enabled()).finish()
    }
}

/// Discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<Event> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: Event) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs every event through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<Event> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: Event) -> Self::Future {
        tracing::info!(event = %event, "lifeline_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Bounded in-memory ring buffer of events. When full, the oldest event is dropped.
///
/// Clones share the buffer.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<Event>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events dropped because the buffer was full.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Event> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: Event) -> Self::Future {
        let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{CacheEvent, RetryEvent};
    use std::time::Duration;

    fn hit(key: &str) -> Event {
        Event::Cache(CacheEvent::Hit { key: key.to_string() })
    }

    #[tokio::test]
    async fn memory_sink_drops_oldest_when_full() {
        let sink = MemorySink::with_capacity(2);
        emit_best_effort(sink.clone(), hit("a")).await;
        emit_best_effort(sink.clone(), hit("b")).await;
        emit_best_effort(sink.clone(), hit("c")).await;

        assert_eq!(sink.events(), vec![hit("b"), hit("c")]);
        assert_eq!(sink.evicted(), 1);
    }

    #[tokio::test]
    async fn telemetry_handle_forwards_to_sink() {
        let sink = MemorySink::new();
        let telemetry = Telemetry::new(sink.clone());
        assert!(telemetry.is_enabled());

        let event = Event::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::ZERO });
        telemetry.emit(event.clone()).await;

        assert_eq!(sink.events(), vec![event]);
    }

    #[tokio::test]
    async fn disabled_handle_is_silent() {
        let telemetry = Telemetry::disabled();
        assert!(!telemetry.is_enabled());
        telemetry.emit(hit("ignored")).await;
    }

    #[tokio::test]
    async fn log_and_null_sinks_accept_events() {
        Telemetry::new(LogSink).emit(hit("x")).await;
        Telemetry::new(NullSink).emit(hit("y")).await;
    }
}

//! Retry engine for fallible async operations.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries); the default is 4.
//! - Failures are classified through [`Classify`]:
//!   - `Cancelled` and `Status(400..500)` abort immediately as `ResilienceError::Inner`.
//!   - `NoResponse` is always retryable.
//!   - `Status(500..)` is retryable when `retry_on_server_error` is set, otherwise it aborts.
//! - The wait before attempt `n + 1` is `base_delay * 2^(n-1)`, optionally jittered.
//! - When attempts run out, `ResilienceError::RetryExhausted` carries the failures, the last one
//!   being the error that ended the call.
//! - [`RetryPolicy::execute_with_cancel`] checks a `CancellationToken` before every attempt and
//!   races it against every backoff wait. The operation itself is never interrupted, and no
//!   timeout is imposed on it.
//!
//! ```rust
//! use std::time::Duration;
//! use lifeline::{InstantSleeper, RetryPolicy, TransportError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .base_delay(Duration::from_millis(100))
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//!
//! let result = policy
//!     .execute(|| async { Err::<(), _>(TransportError::no_response("offline")) })
//!     .await;
//! assert!(result.unwrap_err().is_retry_exhausted());
//! # });
//! ```

use crate::error::{BuildError, Classify, FailureKind, MAX_RETRY_FAILURES};
use crate::telemetry::{Event, RetryEvent, Telemetry, TelemetrySink};
use crate::{Backoff, Jitter, ResilienceError, Sleeper, TokioSleeper};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_ATTEMPTS: usize = 4;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// What the engine does with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abort,
}

/// Classify a failure under the given server-error policy.
pub fn classify(kind: FailureKind, retry_on_server_error: bool) -> RetryDecision {
    match kind {
        FailureKind::Cancelled => RetryDecision::Abort,
        FailureKind::NoResponse => RetryDecision::Retry,
        FailureKind::Status(status) if (500..600).contains(&status) && retry_on_server_error => {
            RetryDecision::Retry
        }
        FailureKind::Status(_) => RetryDecision::Abort,
    }
}

/// Retry policy: attempt budget, exponential backoff, server-error opt-in.
///
/// Cheap to clone; construct once and share.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    retry_on_server_error: bool,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::exponential(DEFAULT_BASE_DELAY),
            jitter: Jitter::None,
            retry_on_server_error: true,
            sleeper: Arc::new(TokioSleeper),
            telemetry: Telemetry::disabled(),
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.backoff.base()
    }

    pub fn retry_on_server_error(&self) -> bool {
        self.retry_on_server_error
    }

    /// Wait inserted before the attempt following attempt `attempt` (1-indexed), before jitter.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Run `operation` with retry semantics.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, ResilienceError<E>>
    where
        E: Classify + std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        self.run(None, operation).await
    }

    /// Run `operation` with retry semantics, stopping as soon as `token` is cancelled.
    pub async fn execute_with_cancel<T, E, Fut, Op>(
        &self,
        token: &CancellationToken,
        operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        self.run(Some(token), operation).await
    }

    async fn run<T, E, Fut, Op>(
        &self,
        token: Option<&CancellationToken>,
        mut operation: Op,
    ) -> Result<T, ResilienceError<E>>
    where
        E: Classify + std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let started = Instant::now();
        let mut failures: VecDeque<E> = VecDeque::new();
        let mut attempt = 0;

        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(self.cancelled(attempt).await);
            }

            attempt += 1;
            tracing::debug!(attempt, max_attempts = self.max_attempts, "retry: starting attempt");

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if classify(error.failure_kind(), self.retry_on_server_error) == RetryDecision::Abort {
                tracing::debug!(attempt, error = %error, "retry: non-retryable failure");
                self.telemetry
                    .emit(Event::Retry(RetryEvent::Aborted { attempt, reason: error.to_string() }))
                    .await;
                return Err(ResilienceError::Inner(error));
            }

            if attempt >= self.max_attempts {
                tracing::warn!(attempts = attempt, error = %error, "retry: attempts exhausted");
                failures.push_back(error);
                self.telemetry
                    .emit(Event::Retry(RetryEvent::Exhausted {
                        total_attempts: attempt,
                        total_duration: started.elapsed(),
                    }))
                    .await;
                return Err(ResilienceError::retry_exhausted(attempt, failures.into()));
            }

            let delay = self.jitter.apply(self.backoff.delay(attempt));
            tracing::warn!(attempt, ?delay, error = %error, "retry: retryable failure, backing off");
            failures.push_back(error);
            while failures.len() > MAX_RETRY_FAILURES {
                failures.pop_front();
            }
            self.telemetry.emit(Event::Retry(RetryEvent::Attempt { attempt, delay })).await;

            match token {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(self.cancelled(attempt).await),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
                None => self.sleeper.sleep(delay).await,
            }
        }
    }

    async fn cancelled<E>(&self, attempts: usize) -> ResilienceError<E> {
        tracing::debug!(attempts, "retry: cancelled");
        self.telemetry.emit(Event::Retry(RetryEvent::Cancelled { attempts })).await;
        ResilienceError::Cancelled { attempts }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Option<Duration>,
    jitter: Jitter,
    retry_on_server_error: bool,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl RetryPolicyBuilder {
    /// Builder with the defaults: 4 attempts, 500ms base delay, retry on 5xx, no jitter.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: None,
            jitter: Jitter::None,
            retry_on_server_error: true,
            sleeper: Arc::new(TokioSleeper),
            telemetry: Telemetry::disabled(),
        }
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Cap the exponential growth. Ignored if smaller than the base delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn retry_on_server_error(mut self, enabled: bool) -> Self {
        self.retry_on_server_error = enabled;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.telemetry = Telemetry::new(sink);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        let exponential = Backoff::exponential(self.base_delay);
        let backoff = match self.max_delay {
            Some(max) => exponential.with_max(max).unwrap_or(exponential),
            None => exponential,
        };
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            backoff,
            jitter: self.jitter,
            retry_on_server_error: self.retry_on_server_error,
            sleeper: self.sleeper,
            telemetry: self.telemetry,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

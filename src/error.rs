//! Error types for the retry engine, the key/value backends and the TTL cache.
//!
//! Only the retry engine surfaces failures as `Err` to callers in the normal course of things.
//! The self-healing store reports failures inside its outcome structs instead.
use std::fmt;
use std::sync::Arc;

/// Cap the number of stored failures inside `RetryExhausted` to avoid unbounded growth.
pub const MAX_RETRY_FAILURES: usize = 10;

/// How a failed operation presented itself to the retry engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The caller aborted the operation.
    Cancelled,
    /// No response was received at all (connectivity, DNS, reset).
    NoResponse,
    /// A response arrived carrying this HTTP-class status.
    Status(u16),
}

/// Lets the retry engine decide retryability without knowing the transport.
pub trait Classify {
    fn failure_kind(&self) -> FailureKind;
}

/// Ready-made transport error for callers that do not have their own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,
    #[error("no response: {0}")]
    NoResponse(String),
    #[error("http status {status}: {message}")]
    Status { status: u16, message: String },
}

impl TransportError {
    pub fn no_response(message: impl Into<String>) -> Self {
        TransportError::NoResponse(message.into())
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        TransportError::Status { status, message: message.into() }
    }
}

impl Classify for TransportError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            TransportError::Cancelled => FailureKind::Cancelled,
            TransportError::NoResponse(_) => FailureKind::NoResponse,
            TransportError::Status { status, .. } => FailureKind::Status(*status),
        }
    }
}

/// Terminal failure of [`RetryPolicy::execute`](crate::RetryPolicy::execute).
#[derive(Debug, Clone)]
pub enum ResilienceError<E> {
    /// A non-retryable failure, propagated on the attempt that produced it.
    Inner(E),
    /// Every permitted attempt failed with a retryable error.
    RetryExhausted { attempts: usize, failures: Arc<Vec<E>> },
    /// The cancellation token fired before the next attempt could start.
    Cancelled { attempts: usize },
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner(e) => write!(f, "{}", e),
            Self::RetryExhausted { attempts, failures } => match failures.last() {
                Some(last) => {
                    write!(f, "retry exhausted after {} attempts; last error: {}", attempts, last)
                }
                None => write!(f, "retry exhausted after {} attempts; no recorded failures", attempts),
            },
            Self::Cancelled { attempts } => {
                write!(f, "operation cancelled after {} attempts", attempts)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => {
                failures.last().map(|e| e as &dyn std::error::Error)
            }
            Self::Cancelled { .. } => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Build `RetryExhausted`, keeping only the most recent `MAX_RETRY_FAILURES` failures.
    pub fn retry_exhausted(attempts: usize, mut failures: Vec<E>) -> Self {
        if failures.len() > MAX_RETRY_FAILURES {
            failures.drain(..failures.len() - MAX_RETRY_FAILURES);
        }
        ResilienceError::RetryExhausted { attempts, failures: Arc::new(failures) }
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// The last error the operation produced, if any attempt ran.
    pub fn last_failure(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::RetryExhausted { failures, .. } => failures.last(),
            Self::Cancelled { .. } => None,
        }
    }

    /// Recorded failures for `RetryExhausted`, oldest first.
    pub fn failures(&self) -> Option<&[E]> {
        match self {
            Self::RetryExhausted { failures, .. } => Some(failures.as_slice()),
            _ => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure reported by a [`KeyValueStore`](crate::kv::KeyValueStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a mutating [`TtlCache`](crate::TtlCache) operation.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache write for `{key}` failed: {reason}")]
    Write { key: String, reason: String },
    #[error("cache delete for `{key}` failed: {reason}")]
    Delete { key: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cache entry could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("metadata key `{metadata_key}` must not live under the entry prefix `{prefix}`")]
    MetadataKeyUnderPrefix { prefix: String, metadata_key: String },
    #[error("cache prefix must not be empty")]
    EmptyPrefix,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("{0}")]
    struct DummyError(&'static str);

    #[test]
    fn exhausted_display_names_last_error() {
        let err = ResilienceError::retry_exhausted(3, vec![DummyError("first"), DummyError("last")]);
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.ends_with("last error: last"));
        assert_eq!(err.last_failure(), Some(&DummyError("last")));
    }

    #[test]
    fn exhausted_without_failures_is_readable() {
        let err: ResilienceError<DummyError> = ResilienceError::retry_exhausted(2, vec![]);
        assert!(err.to_string().contains("no recorded failures"));
        assert!(err.source().is_none());
    }

    #[test]
    fn exhausted_keeps_most_recent_failures() {
        let failures: Vec<_> = (0..25).map(|_| DummyError("x")).collect();
        let err = ResilienceError::retry_exhausted(25, failures);
        assert_eq!(err.failures().map(<[_]>::len), Some(MAX_RETRY_FAILURES));
    }

    #[test]
    fn cancelled_has_no_failure() {
        let err: ResilienceError<DummyError> = ResilienceError::Cancelled { attempts: 1 };
        assert!(err.is_cancelled());
        assert!(err.last_failure().is_none());
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn inner_exposes_source() {
        let err = ResilienceError::Inner(DummyError("boom"));
        assert!(err.is_inner());
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
        assert_eq!(err.into_inner(), Some(DummyError("boom")));
    }

    #[test]
    fn transport_error_classifies() {
        assert_eq!(TransportError::Cancelled.failure_kind(), FailureKind::Cancelled);
        assert_eq!(TransportError::no_response("reset").failure_kind(), FailureKind::NoResponse);
        assert_eq!(TransportError::status(503, "busy").failure_kind(), FailureKind::Status(503));
    }
}

//! Backoff schedules for retry loops.
//!
//! Attempt numbering: `delay(0)` is the initial call and is always zero; the wait before the
//! `n + 1`-th call is `delay(n)`.
//!
//! - `Backoff::exponential(b)` waits `b * 2^(n-1)`; the retry engine uses it.
//! - `Backoff::linear(b)` waits `b * n`; the self-healing store uses it for I/O retries.
//! - `Backoff::constant(d)` always waits `d`.
//!
//! ```rust
//! use std::time::Duration;
//! use lifeline::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(500));
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(500));
//! assert_eq!(backoff.delay(3), Duration::from_millis(2000));
//! ```
//!
//! Overflowing computations saturate at [`MAX_BACKOFF`].

use std::time::Duration;

/// Ceiling applied to every computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Constant,
    Linear,
    Exponential,
}

/// A delay schedule indexed by attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    shape: Shape,
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Self { shape: Shape::Constant, base: delay, max: None }
    }

    pub fn linear(base: Duration) -> Self {
        Self { shape: Shape::Linear, base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Self { shape: Shape::Exponential, base, max: None }
    }

    /// Cap linear or exponential growth at `max`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match self.shape {
            Shape::Constant => Err(BackoffError::ConstantDoesNotSupportMax),
            _ if max < self.base => Err(BackoffError::MaxLessThanBase { base: self.base, max }),
            _ => {
                self.max = Some(max);
                Ok(self)
            }
        }
    }

    /// Base delay the schedule was built from.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay to wait before the call following attempt `attempt` (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match self.shape {
            Shape::Constant => self.base,
            Shape::Linear => {
                let factor = attempt.min(u32::MAX as usize) as u32;
                self.base.checked_mul(factor).unwrap_or(MAX_BACKOFF)
            }
            Shape::Exponential => {
                let exponent = (attempt - 1).min(u32::MAX as usize) as u32;
                let nanos = self.base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64)
            }
        };
        let capped = self.max.map_or(raw, |m| raw.min(m));
        capped.min(MAX_BACKOFF)
    }
}

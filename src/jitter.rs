//! Optional randomization of backoff delays.
//!
//! Every policy in this crate defaults to [`Jitter::None`], so backoff delays are exact unless a
//! caller opts in. `Full` draws uniformly from `[0, delay]`; `Equal` from `[delay/2, delay]`.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy applied to each computed backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Use the backoff delay as-is.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Randomize `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Randomize `delay` with a caller-provided RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        // saturate absurdly large durations instead of panicking
        let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            _ if millis == 0 => Duration::ZERO,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn none_is_exact() {
        assert_eq!(Jitter::default().apply(Duration::from_millis(750)), Duration::from_millis(750));
    }

    #[test]
    fn full_stays_within_delay() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = Jitter::full().apply_with_rng(Duration::from_millis(400), &mut rng);
            assert!(d <= Duration::from_millis(400));
        }
    }

    #[test]
    fn equal_keeps_half_floor() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..200 {
            let d = Jitter::equal().apply_with_rng(Duration::from_millis(400), &mut rng);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(Jitter::equal().apply(Duration::ZERO), Duration::ZERO);
    }
}

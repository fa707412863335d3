//! Exponential backoff with optional jitter.
//!
//! Delay for retry number `n` (1-based) is `base * 2^(n-1)`, capped at `max`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Jitter type for adding randomness to retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// No jitter
    #[default]
    None,
    /// Full jitter: 0 to calculated delay
    Full,
    /// Equal jitter: calculated delay / 2 to calculated delay
    Equal,
}

impl Jitter {
    /// Apply jitter to the calculated delay
    pub fn apply(self, delay: Duration) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Self::None => delay,
            Self::Full if millis > 0 => {
                Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
            }
            Self::Equal if millis > 0 => {
                let half = millis / 2;
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=millis - half))
            }
            Self::Full | Self::Equal => delay,
        }
    }
}

/// Exponential backoff policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter: Jitter,
}

impl ExponentialBackoff {
    /// Create a policy without jitter
    ///
    /// `max` is raised to `base` when smaller.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max: max.max(base), jitter: Jitter::None }
    }

    /// Set the jitter applied after capping
    #[must_use]
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base delay
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay cap
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Deterministic delay before retry number `retry` (1-based)
    pub fn raw_delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(31);
        self.base.checked_mul(1_u32 << shift).map_or(self.max, |d| d.min(self.max))
    }

    /// Delay before retry number `retry`, with jitter applied
    pub fn delay(&self, retry: u32) -> Duration {
        self.jitter.apply(self.raw_delay(retry))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(15 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.raw_delay(1), Duration::from_secs(1));
        assert_eq!(backoff.raw_delay(2), Duration::from_secs(2));
        assert_eq!(backoff.raw_delay(3), Duration::from_secs(4));
        assert_eq!(backoff.raw_delay(4), Duration::from_secs(8));
        assert_eq!(backoff.raw_delay(5), Duration::from_secs(10));
        assert_eq!(backoff.raw_delay(200), Duration::from_secs(10));
    }

    #[test]
    fn retry_zero_behaves_like_first_retry() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(backoff.raw_delay(0), Duration::from_millis(100));
    }

    #[test]
    fn max_is_never_below_base() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.max(), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(400), Duration::from_secs(10));
        for _ in 0..50 {
            let full = backoff.with_jitter(Jitter::Full).delay(2);
            assert!(full <= Duration::from_millis(800));

            let equal = backoff.with_jitter(Jitter::Equal).delay(2);
            assert!(equal >= Duration::from_millis(400) && equal <= Duration::from_millis(800));
        }
    }
}

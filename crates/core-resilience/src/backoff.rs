//! Bounded exponential backoff with jitter
//!
//! Delay before retry `n` (1-based) is `base * 2^(n-1)`, capped at `max`,
//! plus up to `jitter` of itself drawn at random.
//!
//! # Example
//!
//! ```
//! use shardline_core_resilience::Backoff;
//! use std::time::Duration;
//!
//! let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(2), 5)
//!     .unwrap()
//!     .without_jitter();
//!
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay(10), Duration::from_secs(2));
//! assert!(backoff.allows(4));
//! assert!(!backoff.allows(5));
//! ```

use rand::Rng;
use std::time::Duration;

use super::error::ResilienceError;

/// Retry pacing policy
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_attempts: u32,
    jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: 20,
            jitter: 0.25,
        }
    }
}

impl Backoff {
    /// Create a policy allowing `max_attempts` total attempts
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Result<Self, ResilienceError> {
        if max_attempts == 0 {
            return Err(ResilienceError::InvalidBackoff(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if max < base {
            return Err(ResilienceError::InvalidBackoff(format!(
                "max delay {:?} is below base delay {:?}",
                max, base
            )));
        }

        Ok(Self {
            base,
            max,
            max_attempts,
            ..Default::default()
        })
    }

    /// Disable random jitter (deterministic delays)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Set the jitter fraction, clamped to `0.0..=1.0`
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Total attempts permitted, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow `attempts_made` failed attempts
    pub fn allows(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let scaled = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);

        if self.jitter > 0.0 {
            let extra = rand::rng().random_range(0.0..=self.jitter);
            (scaled + scaled.mul_f64(extra)).min(self.max)
        } else {
            scaled
        }
    }

    /// Sleep for the delay following failed attempt `attempt`
    pub async fn wait(&self, attempt: u32) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let backoff = Backoff::default();
        assert_eq!(backoff.max_attempts(), 20);
        assert!(backoff.allows(19));
        assert!(!backoff.allows(20));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = Backoff::new(Duration::ZERO, Duration::ZERO, 0).unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidBackoff(_)));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let result = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 3);
        assert!(result.is_err());
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(70), 10)
            .unwrap()
            .without_jitter();

        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(2), Duration::from_millis(20));
        assert_eq!(backoff.delay(3), Duration::from_millis(40));
        assert_eq!(backoff.delay(4), Duration::from_millis(70));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(70));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10), 5)
            .unwrap()
            .with_jitter(0.5);

        for _ in 0..100 {
            let delay = backoff.delay(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_delay() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 5)
            .unwrap()
            .without_jitter();

        let start = tokio::time::Instant::now();
        backoff.wait(3).await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_zero_base_does_not_sleep() {
        let backoff = Backoff::new(Duration::ZERO, Duration::ZERO, 3).unwrap();
        tokio_test::assert_ready!(tokio_test::task::spawn(backoff.wait(2)).poll());
    }
}

//! Exponential backoff with jitter.
//!
//! [`BackoffPolicy`] is the configuration, [`Backoff`] the per-operation state.
//! The fetch layer uses it between retries and the streaming client between
//! reconnect attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shape of an exponential backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter: f64,
    /// Maximum number of attempts, 0 for unlimited.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 0,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy without jitter.
    #[must_use]
    pub const fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter: 0.0,
            max_attempts: 0,
        }
    }

    /// Sets the jitter fraction.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the attempt limit.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Starts a fresh backoff sequence.
    #[must_use]
    pub fn start(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Running backoff sequence.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current_delay: Duration,
    attempt_count: u32,
}

impl Backoff {
    /// Creates a sequence from a policy.
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        let current_delay = policy.initial_delay;
        Self {
            policy,
            current_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_attempts > 0 && self.attempt_count >= self.policy.max_attempts {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.policy.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.policy.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay.min(self.policy.max_delay))
    }

    /// Restarts the sequence after a success.
    pub const fn reset(&mut self) {
        self.current_delay = self.policy.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.policy.jitter <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base = duration.as_millis() as f64;
        let range = base * self.policy.jitter;
        let jitter: f64 = rand::rng().random_range(-range..=range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (base + jitter).max(1.0) as u64;
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let mut backoff = BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_secs(10),
            2.0,
        )
        .start();

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.attempt_count(), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let mut backoff = BackoffPolicy::new(
            Duration::from_millis(1000),
            Duration::from_millis(1500),
            4.0,
        )
        .start();

        let _ = backoff.next_delay();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1500)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_max_attempts_and_reset() {
        let mut backoff = BackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(1), 2.0)
            .with_max_attempts(2)
            .start();

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::new(Duration::from_millis(1000), Duration::from_secs(10), 2.0)
            .with_jitter(0.1);

        for _ in 0..100 {
            let millis = policy.start().next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }
}

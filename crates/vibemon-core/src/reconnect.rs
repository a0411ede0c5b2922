//! Reconnect backoff policy.
//!
//! After a lost link or a failed attempt the manager waits before scanning
//! again. The delay doubles per consecutive failed attempt and is capped;
//! a session that reaches the active state resets the attempt counter.

use std::time::Duration;

use crate::error::{Error, Result};

/// Backoff policy for automatic reconnection.
///
/// Attempts are unlimited; only an explicit stop ends the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Ceiling for the growing delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy with defaults (2 s doubling to a 30 s cap).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay before the first attempt.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before attempt number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial_delay
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        doubled.min(self.max_delay)
    }

    /// Validate the policy and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_delays_are_monotonic() {
        let policy = ReconnectPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..12 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
    }

    #[test]
    fn test_custom_policy() {
        let policy = ReconnectPolicy::new()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        assert!(
            ReconnectPolicy::new()
                .initial_delay(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ReconnectPolicy::new()
                .initial_delay(Duration::from_secs(60))
                .max_delay(Duration::from_secs(30))
                .validate()
                .is_err()
        );
        assert!(ReconnectPolicy::default().validate().is_ok());
    }
}

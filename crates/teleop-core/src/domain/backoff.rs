//! Exponential reconnect delay.
//!
//! After `K` consecutive failed connection attempts the delay before the next
//! attempt is `min(initial * factor^K, max)`.  Any success resets it to
//! `initial`.

use std::time::Duration;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_FACTOR: f64 = 1.5;

/// Reconnect delay state for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    failures: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY, DEFAULT_FACTOR)
    }
}

impl Backoff {
    /// Creates a policy; `max` is raised to `initial` and `factor` to 1.0 if smaller.
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            factor: factor.max(1.0),
            current: initial,
            failures: 0,
        }
    }

    /// Delay to wait before the next attempt.
    pub fn delay(&self) -> Duration {
        self.current
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failed attempt and returns the grown delay.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.current = self.current.mul_f64(self.factor).min(self.max);
        self.current
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_after(k: i32) -> Duration {
        DEFAULT_INITIAL_DELAY
            .mul_f64(DEFAULT_FACTOR.powi(k))
            .min(DEFAULT_MAX_DELAY)
    }

    #[test]
    fn test_initial_delay_is_five_seconds() {
        assert_eq!(Backoff::default().delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_after_k_failures_matches_closed_form() {
        // Arrange
        let mut backoff = Backoff::default();

        for k in 1..=10 {
            // Act
            backoff.record_failure();

            // Assert: tolerate float rounding in the nanosecond digits
            let (got, want) = (backoff.delay(), expected_after(k));
            let diff = if got > want { got - want } else { want - got };
            assert!(
                diff < Duration::from_micros(1),
                "k={k}: got {got:?}, expected {want:?}"
            );
        }
    }

    #[test]
    fn test_delay_is_capped_at_thirty_seconds() {
        let mut backoff = Backoff::default();
        for _ in 0..50 {
            backoff.record_failure();
        }
        assert_eq!(backoff.delay(), Duration::from_secs(30));
        assert_eq!(backoff.failures(), 50);
    }

    #[test]
    fn test_success_resets_delay() {
        let mut backoff = Backoff::default();
        backoff.record_failure();
        backoff.record_failure();

        backoff.record_success();

        assert_eq!(backoff.delay(), Duration::from_secs(5));
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn test_first_failure_gives_seven_and_a_half_seconds() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.record_failure(), Duration::from_millis(7500));
    }
}

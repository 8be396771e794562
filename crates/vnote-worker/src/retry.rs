//! Poll loop backoff and failure log suppression.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

/// Exponential backoff with full jitter.
///
/// The n-th delay is drawn uniformly from `[0, min(max, base * 2^n)]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Upper bound of the next delay, before jitter.
    pub fn ceiling(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Next delay; each call doubles the ceiling until it reaches `max`.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=ceiling_ms))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Counts consecutive failures of one operation and decides which of them
/// are worth a log line.
///
/// The first `max_logged` failures in a row are logged, then one
/// suppression notice, then nothing until the operation succeeds again.
#[derive(Debug)]
pub struct FailureTracker {
    operation: &'static str,
    consecutive: u32,
    max_logged: u32,
}

impl FailureTracker {
    pub fn new(operation: &'static str, max_logged: u32) -> Self {
        Self {
            operation,
            consecutive: 0,
            max_logged,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > self.max_logged {
            info!(
                operation = self.operation,
                failures = self.consecutive,
                "Recovered after suppressed failures"
            );
        } else if self.consecutive > 0 {
            debug!(operation = self.operation, failures = self.consecutive, "Recovered");
        }
        self.consecutive = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);

        if self.consecutive == self.max_logged + 1 {
            warn!(
                operation = self.operation,
                "{} failed {} times in a row, suppressing further logs until it recovers",
                self.operation,
                self.max_logged
            );
        }
        self.consecutive <= self.max_logged
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive
    }

    pub fn is_suppressing(&self) -> bool {
        self.consecutive > self.max_logged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_ceiling_doubles_until_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        let mut ceilings = Vec::new();
        for _ in 0..8 {
            ceilings.push(backoff.ceiling().as_secs());
            backoff.next_delay();
        }

        assert_eq!(ceilings, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_backoff_delay_within_ceiling() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(400));
        for _ in 0..50 {
            let ceiling = backoff.ceiling();
            assert!(backoff.next_delay() <= ceiling);
        }
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.ceiling(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_survives_many_attempts() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..200 {
            backoff.next_delay();
        }
        assert_eq!(backoff.ceiling(), Duration::from_secs(60));
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new("fetch", 3);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.is_suppressing());

        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.is_suppressing());
        assert_eq!(tracker.failure_count(), 5);

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(!tracker.is_suppressing());

        assert!(tracker.record_failure());
    }
}

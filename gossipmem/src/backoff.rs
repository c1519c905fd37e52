use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(1);

/// Exponential backoff for a receive loop that keeps failing.
///
/// Owned by a single task, so it needs no synchronization.
#[derive(Debug, Default)]
pub(crate) struct BackOff {
    consecutive_failures: u32,
}

impl BackOff {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Increments the count of consecutive failures and returns the new count.
    pub(crate) fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Delay before the next attempt, doubling per consecutive failure.
    pub(crate) fn calculate_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (self.consecutive_failures - 1).min(16);
        std::cmp::min(BASE_DELAY * 2u32.pow(exponent), MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_delay_without_failures() {
        let backoff = BackOff::new();
        assert_eq!(backoff.calculate_delay(), Duration::ZERO);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let mut backoff = BackOff::new();
        backoff.record_failure();
        assert_eq!(backoff.calculate_delay(), BASE_DELAY);
        backoff.record_failure();
        assert_eq!(backoff.calculate_delay(), BASE_DELAY * 2);

        for _ in 0..100 {
            backoff.record_failure();
        }
        assert_eq!(backoff.calculate_delay(), MAX_DELAY);
    }

    #[test]
    fn test_success_resets() {
        let mut backoff = BackOff::new();
        assert_eq!(backoff.record_failure(), 1);
        assert_eq!(backoff.record_failure(), 2);
        backoff.record_success();
        assert_eq!(backoff.calculate_delay(), Duration::ZERO);
        assert_eq!(backoff.record_failure(), 1);
    }
}

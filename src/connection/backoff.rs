//! Reconnect backoff: `min(base * 2^attempt, max)`, no jitter

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(30_000))
    }
}

impl BackoffPolicy {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before reconnect attempt number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }

    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let base = self.base.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        2u64.checked_pow(attempt)
            .and_then(|factor| base.checked_mul(factor))
            .map_or(max, |delay| delay.min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_curve() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_ms(0), 1000);
        assert_eq!(policy.delay_ms(1), 2000);
        assert_eq!(policy.delay_ms(2), 4000);
        assert_eq!(policy.delay_ms(3), 8000);
        assert_eq!(policy.delay_ms(4), 16000);
        assert_eq!(policy.delay_ms(5), 30000);
        assert_eq!(policy.delay_ms(10), 30000);
    }

    #[test]
    fn test_huge_attempt_saturates_at_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(64), Duration::from_millis(30000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn test_matches_formula() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_millis(9000));
        for n in 0..20u32 {
            let expected = (250u64 * 2u64.pow(n)).min(9000);
            assert_eq!(policy.delay_ms(n), expected, "attempt {}", n);
        }
    }
}

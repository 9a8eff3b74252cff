//! Reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter for reconnect attempts.
///
/// Each failure doubles the base delay up to a cap; the actual delay is
/// drawn uniformly from the second half of the window so simultaneous
/// clients do not stampede the server in lockstep.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// A policy starting at `base` and capped at `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    /// Delay before the next attempt. Advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        let ceiling = self
            .base
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max);
        let jittered = ceiling.as_millis() as u64 / 2
            + rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64 / 2);
        Duration::from_millis(jittered.max(1))
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget failure history after a healthy connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_stay_bounded() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));
        let mut previous_ceiling = Duration::ZERO;
        for attempt in 0..10 {
            let delay = backoff.next_delay();
            let ceiling = Duration::from_millis(100)
                .saturating_mul(2u32.pow(attempt))
                .min(Duration::from_secs(5));
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
            assert!(delay >= ceiling / 2, "attempt {attempt}: {delay:?} < half of {ceiling:?}");
            assert!(ceiling >= previous_ceiling);
            previous_ceiling = ceiling;
        }
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert_eq!(backoff.attempt(), 5);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(100));
    }
}

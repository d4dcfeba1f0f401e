//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Stateful exponential backoff.
///
/// Each call to [`next_backoff`](Self::next_backoff) grows the interval by
/// `multiplier` up to `max_interval`, then randomizes it by
/// `±randomization_factor`. There is no retry limit; callers decide when to
/// stop and call [`reset`](Self::reset) after a success.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    randomization_factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier: 1.5,
            randomization_factor: 0.5,
            current: initial_interval,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay before the next attempt.
    pub fn next_backoff(&mut self) -> Duration {
        let base = self.current;
        self.current = self
            .current
            .mul_f64(self.multiplier)
            .min(self.max_interval);
        jitter(base, self.randomization_factor)
    }

    /// Start over from the initial interval.
    pub fn reset(&mut self) {
        self.current = self.initial_interval;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }
}

fn jitter(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || interval.is_zero() {
        return interval;
    }
    let spread = rand::thread_rng().gen_range(-factor..=factor);
    interval.mul_f64(1.0 + spread)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_until_capped() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(400))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0);

        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(200));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(400));
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1))
            .with_multiplier(2.0)
            .with_randomization_factor(0.0);
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff = ExponentialBackoff::default();
        for _ in 0..50 {
            let delay = backoff.next_backoff();
            assert!(delay <= Duration::from_secs(90));
        }
        backoff.reset();
        let first = backoff.next_backoff();
        assert!(first >= Duration::from_millis(250) && first <= Duration::from_millis(750));
    }
}

//! Exponential backoff with jitter for the Order Executor's retry loop
//! (§4.4). Grounded on the same shape as a resilience-crate backoff helper:
//! a small config struct plus a stateful iterator-like advancer, rather than
//! a one-shot function, so the executor can log the attempt count alongside
//! each wait.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    /// Fractional jitter applied symmetrically around the computed delay,
    /// e.g. `0.1` for ±10%.
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(10),
            jitter: 0.1,
            max_attempts: 5,
        }
    }
}

/// Tracks the current attempt number and produces the next delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Attempts already consumed (0 before the first call to `next_delay`).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    /// Compute the delay for the next attempt and advance the counter.
    /// Returns `None` once `max_attempts` has been reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts_exhausted() {
            return None;
        }
        let exp = 2u32.saturating_pow(self.attempt);
        let unjittered = self.config.base.saturating_mul(exp).min(self.config.cap);
        self.attempt += 1;
        Some(apply_jitter(unjittered, self.config.jitter))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    let millis = (delay.as_millis() as f64 * factor).max(0.0);
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_respect_cap() {
        let config = BackoffConfig { base: Duration::from_millis(500), cap: Duration::from_secs(10), jitter: 0.0, max_attempts: 6 };
        let mut backoff = ExponentialBackoff::new(config);
        let mut last = Duration::ZERO;
        for _ in 0..6 {
            let d = backoff.next_delay().unwrap();
            assert!(d >= last || d == config.cap);
            assert!(d <= config.cap);
            last = d;
        }
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = BackoffConfig { base: Duration::from_millis(1000), cap: Duration::from_secs(10), jitter: 0.1, max_attempts: 1 };
        let mut backoff = ExponentialBackoff::new(config);
        let d = backoff.next_delay().unwrap();
        assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100));
    }

    #[test]
    fn reset_allows_reuse() {
        let mut backoff = ExponentialBackoff::new(BackoffConfig { max_attempts: 1, jitter: 0.0, ..Default::default() });
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }
}

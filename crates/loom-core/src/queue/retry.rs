//! Retry policy: decides backoff delays.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Smallest delay ever returned, so `run_after` strictly increases on retry.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Capped exponential backoff with additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay unit; attempt `n` waits `base_delay * 2^n` before jitter.
    pub base_delay: Duration,

    /// Cap applied before jitter.
    pub max_delay: Duration,

    /// Jitter is drawn from `[0, delay * jitter_ratio]`.
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_ratio: Self::DEFAULT_JITTER_RATIO,
        }
    }

    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    /// `min(max_delay, base_delay * 2^attempt_count)` without jitter.
    ///
    /// Example with base=30s, max=1h:
    /// - attempt 1: 60s
    /// - attempt 2: 120s
    /// - attempt 7: 3840s -> capped at 3600s
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        2u32.checked_pow(attempt_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Pure form: `unit` is a sample in `[0, 1]` from the jitter source.
    pub fn delay_with_jitter(&self, attempt_count: u32, unit: f64) -> Duration {
        let delay = self.backoff(attempt_count);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0) * unit.clamp(0.0, 1.0);
        let jitter = delay.mul_f64(ratio);
        delay.saturating_add(jitter).max(MIN_DELAY)
    }

    /// Offset to add to `now` for the next `run_after`.
    pub fn next_delay(&self, attempt_count: u32, jitter: &dyn JitterSource) -> Duration {
        self.delay_with_jitter(attempt_count, jitter.sample())
    }
}

impl Default for RetryPolicy {
    /// 30s base, capped at 30s * 2^8 (the original polling cadence).
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(30 * 256))
    }
}

/// Source of jitter samples, injectable for deterministic tests.
pub trait JitterSource: Send + Sync {
    /// Uniform sample in `[0, 1]`.
    fn sample(&self) -> f64;
}

/// Production source backed by the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..=1.0)
    }
}

/// Reproducible sequence for a fixed seed.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(0.0..=1.0),
            Err(poisoned) => poisoned.into_inner().gen_range(0.0..=1.0),
        }
    }
}

/// Always zero jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(30), Duration::from_secs(3600))
    }

    #[rstest]
    #[case(0, 30)]
    #[case(1, 60)]
    #[case(2, 120)]
    #[case(6, 1920)]
    #[case(7, 3600)]
    #[case(64, 3600)]
    fn exponential_backoff_is_capped(#[case] attempt: u32, #[case] secs: u64) {
        assert_eq!(policy().backoff(attempt), Duration::from_secs(secs));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(1, 0.0), Duration::from_secs(60));
        assert_eq!(p.delay_with_jitter(1, 1.0), Duration::from_secs(72));

        let jitter = ThreadRngJitter;
        for _ in 0..100 {
            let d = p.next_delay(2, &jitter);
            assert!(d >= Duration::from_secs(120));
            assert!(d <= Duration::from_secs(144));
        }
    }

    #[test]
    fn seeded_jitter_is_deterministic() {
        let p = policy();
        let a = SeededJitter::new(42);
        let b = SeededJitter::new(42);

        let xs: Vec<_> = (1..6).map(|n| p.next_delay(n, &a)).collect();
        let ys: Vec<_> = (1..6).map(|n| p.next_delay(n, &b)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn zero_base_still_moves_forward() {
        let p = RetryPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(p.next_delay(3, &NoJitter), MIN_DELAY);
    }

    #[test]
    fn default_matches_original_cadence() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_delay, Duration::from_secs(30));
        assert_eq!(p.backoff(8), Duration::from_secs(7680));
        assert_eq!(p.backoff(9), Duration::from_secs(7680));
    }
}

//! Capped exponential backoff with jitter
//!
//! `delay(attempt) = min(cap, base * 2^attempt) * (1 + jitter_fraction * sample)`
//! where `sample` is drawn uniformly from `[-1, 1]`. The computation is a
//! pure function of its inputs; only [`BackoffPolicy::next_delay`] draws
//! randomness.

use std::time::Duration;

use rand::Rng;

/// Backoff policy for endpoint recovery attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound on the un-jittered delay
    pub cap: Duration,
    /// Relative jitter in `[0, 1)`; 0 disables jitter
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter_fraction: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Policy with no jitter
    pub fn fixed(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter_fraction: 0.0,
        }
    }

    /// Un-jittered delay for a 0-indexed attempt
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31); // 2^31 * any sane base already exceeds the cap
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Delay for a 0-indexed attempt with an explicit jitter sample in `[-1, 1]`
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let sample = sample.clamp(-1.0, 1.0);
        let factor = 1.0 + self.jitter_fraction * sample;
        self.ceiling(attempt).mul_f64(factor.max(0.0))
    }

    /// Delay for a 0-indexed attempt with a random jitter sample
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let sample = if self.jitter_fraction > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.delay(attempt, sample)
    }
}

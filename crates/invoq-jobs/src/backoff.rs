//! Retry backoff policy.

use std::time::Duration;

use rand::Rng;

use invoq_core::defaults::{JOB_BACKOFF_BASE_MS, JOB_BACKOFF_MAX_MS};

/// Capped exponential backoff: `base * 2^attempts`, never above `max`.
///
/// With `jitter` enabled the delay is drawn uniformly from `[0, capped]`
/// ("full jitter") so retries of jobs that failed together spread out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(JOB_BACKOFF_BASE_MS),
            max: Duration::from_millis(JOB_BACKOFF_MAX_MS),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: false,
        }
    }

    /// Retry immediately. Used by tests and by deployments that rely on
    /// external rate limiting.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Read `JOB_BACKOFF_BASE_MS`, `JOB_BACKOFF_MAX_MS`, `JOB_BACKOFF_JITTER`.
    pub fn from_env() -> Self {
        let base_ms = std::env::var("JOB_BACKOFF_BASE_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_BACKOFF_BASE_MS);
        let max_ms = std::env::var("JOB_BACKOFF_MAX_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_BACKOFF_MAX_MS);
        let jitter = std::env::var("JOB_BACKOFF_JITTER")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms.max(base_ms)),
            jitter,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic upper bound of the delay after `attempts` attempts.
    pub fn capped_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.clamp(0, 31) as u32;
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt, jittered when enabled.
    pub fn delay(&self, attempts: i32) -> Duration {
        let capped = self.capped_delay(attempts);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let millis = capped.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectionConfig;

/// Exponential reconnect delay with a ceiling and random spread.
///
/// `base(n) = min(initial * 2^(n-1), max)` for attempt `n >= 1`; the
/// scheduled delay is `base(n) +/- base(n) * jitter`, clamped to `[0, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ReconnectionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter_factor,
        )
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Un-jittered delay before attempt `attempt` (1-based).
    pub fn base(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Delay for `attempt` given a uniform `sample` in `[0, 1)`. A sample of
    /// 0.5 yields the base delay exactly.
    pub fn delay_with(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base(attempt).as_secs_f64();
        let spread = base * self.jitter * (sample.clamp(0.0, 1.0) * 2.0 - 1.0);
        let secs = (base + spread).clamp(0.0, self.max.as_secs_f64());
        Duration::from_secs_f64(secs).min(self.max)
    }

    /// Randomized delay for `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let sample: f64 = rand::rng().random();
        self.delay_with(attempt, sample)
    }
}

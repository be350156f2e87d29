//! # Backoff Calculator
//!
//! Exponential redelivery delays with collision avoidance.
//!
//! Attempt `k` (1-based) waits `min(initial * multiplier^(k-1), max)`, scaled
//! by a uniform factor in `[1 - f, 1 + f]` and clamped to `max` again, so
//! instances retrying the same failure drift apart instead of retrying in
//! lockstep.

use std::time::Duration;

use crate::config::RedeliveryConfig;

/// Exponent ceiling; any multiplier >= 2 saturates the cap long before this
const MAX_EXPONENT: u32 = 1_024;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffCalculatorConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter spread as a fraction of the delay (0.0 - 1.0)
    pub collision_avoidance_factor: f64,
}

impl Default for BackoffCalculatorConfig {
    fn default() -> Self {
        Self::from(&RedeliveryConfig::default())
    }
}

impl From<&RedeliveryConfig> for BackoffCalculatorConfig {
    fn from(config: &RedeliveryConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            multiplier: config.backoff_multiplier,
            collision_avoidance_factor: config.collision_avoidance_factor,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffCalculatorConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffCalculatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffCalculatorConfig {
        &self.config
    }

    /// Capped exponential delay before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.base_secs(attempt))
    }

    /// Delay to wait before redelivery `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.jittered_delay(attempt, fastrand::f64())
    }

    /// Jittered delay for a given uniform sample in `[0, 1)`
    pub fn jittered_delay(&self, attempt: u32, sample: f64) -> Duration {
        let spread = self.config.collision_avoidance_factor.clamp(0.0, 1.0);
        let factor = 1.0 - spread + 2.0 * spread * sample.clamp(0.0, 1.0);
        let secs = (self.base_secs(attempt) * factor).min(self.max_secs());
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn base_secs(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT) as i32;
        let raw = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        // f64::min discards NaN and caps infinity
        raw.min(self.max_secs()).max(0.0)
    }

    fn max_secs(&self) -> f64 {
        self.config.max_delay.as_secs_f64()
    }
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(BackoffCalculatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator(factor: f64) -> BackoffCalculator {
        BackoffCalculator::new(BackoffCalculatorConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(60_000),
            multiplier: 2.0,
            collision_avoidance_factor: factor,
        })
    }

    #[test]
    fn base_delay_grows_exponentially_then_caps() {
        let calc = calculator(0.0);
        assert_eq!(calc.base_delay(1), Duration::from_millis(500));
        assert_eq!(calc.base_delay(2), Duration::from_millis(1_000));
        assert_eq!(calc.base_delay(5), Duration::from_millis(8_000));
        assert_eq!(calc.base_delay(8), Duration::from_millis(60_000));
        assert_eq!(calc.base_delay(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn zero_factor_means_no_jitter() {
        let calc = calculator(0.0);
        assert_eq!(calc.jittered_delay(3, 0.99), Duration::from_millis(2_000));
    }

    #[test]
    fn jitter_spans_both_sides_of_the_base() {
        let calc = calculator(0.15);
        let low = calc.jittered_delay(3, 0.0);
        let high = calc.jittered_delay(3, 0.999_999);
        assert!(low >= Duration::from_millis(1_699) && low <= Duration::from_millis(1_700));
        assert!(high > Duration::from_millis(2_299) && high <= Duration::from_millis(2_300));
    }

    #[test]
    fn jitter_never_exceeds_the_cap() {
        let calc = calculator(0.15);
        assert_eq!(calc.jittered_delay(20, 0.999), Duration::from_millis(60_000));
    }
}

use std::time::Duration;

use rand::Rng;

use crate::config::UploadConfig;

/// Exponential backoff with a randomization factor.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(cfg: &UploadConfig) -> Self {
        Self {
            initial: cfg.initial_backoff,
            max: cfg.max_backoff,
            multiplier: cfg.backoff_multiplier,
            randomization_factor: cfg.randomization_factor,
            max_attempts: cfg.max_attempts,
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based), capped at `max`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay drawn uniformly from `[d * (1 - f), d * (1 + f)]`.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry).as_secs_f64();
        let f = self.randomization_factor;
        if base == 0.0 || f == 0.0 {
            return Duration::from_secs_f64(base);
        }
        let lo = base * (1.0 - f);
        let hi = base * (1.0 + f);
        Duration::from_secs_f64(rand::thread_rng().gen_range(lo..=hi))
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    pub initial: Duration,
    /// Upper bound for any delay, jitter included
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of the delay randomly added or removed, in `[0, 1]`
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Exponential reconnect delays: 1s, 2s, 4s, ... capped, with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay for `attempt` (0-based) before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.config.multiplier.max(1.0).powi(attempt.min(63) as i32);
        let secs = self.config.initial.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.config.max.as_secs_f64() {
            self.config.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return base;
        }
        let spread = rand::rng().random_range(-jitter..=jitter);
        let secs = (base.as_secs_f64() * (1.0 + spread)).max(0.0);
        Duration::from_secs_f64(secs).min(self.config.max)
    }
}

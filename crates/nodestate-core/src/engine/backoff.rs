//! Exponential backoff with jitter for conflict retries

use rand::Rng;
use std::time::Duration;

use crate::config::BackoffConfig;

/// Stateful backoff: each call to [`Backoff::next_delay`] advances it
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    delay: Duration,
    factor: f64,
    jitter: f64,
    steps: usize,
}

impl Backoff {
    pub(crate) fn new(config: &BackoffConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.initial_delay_ms),
            factor: config.factor,
            jitter: config.jitter,
            steps: config.steps,
        }
    }

    /// Total number of attempts allowed
    pub(crate) fn steps(&self) -> usize {
        self.steps
    }

    /// Delay to wait before the next attempt
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.delay;
        self.delay = Duration::from_nanos((base.as_nanos() as f64 * self.factor) as u64);
        jittered(base, self.jitter)
    }
}

fn jittered(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0.0..jitter);
    base + base.mul_f64(extra)
}

//! Exponential backoff with jitter for reconnect loops.
//!
//! The agent's transport never gives up: on any terminal connection failure
//! it sleeps according to this schedule and dials again. The schedule is
//! exponential with a hard cap and a small random jitter so that a fleet of
//! agents does not reconnect in lockstep after a server restart.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied after each failed attempt
    pub multiplier: f64,
    /// Upper bound on the computed delay
    pub max_delay: Duration,
    /// Jitter fraction applied symmetrically (0.1 = plus/minus 10%)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

/// Stateful backoff tracker. One per reconnect loop.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for the next attempt, advancing the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());
        self.attempt = self.attempt.saturating_add(1);

        if self.config.jitter <= 0.0 {
            return Duration::from_secs_f64(capped);
        }

        let spread = capped * self.config.jitter;
        let jittered = rand::thread_rng().gen_range((capped - spread)..=(capped + spread));
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Reset after a successful connection so the next failure starts from
    /// the initial delay again.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

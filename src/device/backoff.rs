// Reconnect backoff schedule
//
// Bounded exponential backoff with optional jitter. The budget is attempts,
// not wall time: once `next_delay` has handed out `max_attempts` delays the
// schedule is exhausted and the caller must declare the device lost.

use rand::Rng;
use std::time::Duration;

use crate::config::ConnectionConfig;

/// Bounded exponential backoff for reconnect attempts
#[derive(Debug)]
pub struct ReconnectBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    jitter_pct: f64,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            base_delay_ms: config.reconnect_base_delay_ms.max(1),
            max_delay_ms: config.reconnect_max_delay_ms.max(1),
            max_attempts: config.reconnect_max_attempts,
            jitter_pct: config.reconnect_jitter_pct.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Attempts handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next reconnect attempt
    ///
    /// Doubles per attempt from the base delay, capped at the max delay,
    /// with +/- jitter applied last. Returns `None` once the retry budget
    /// is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let exponent = self.attempt.min(31);
        self.attempt += 1;

        let raw = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Some(Duration::from_millis(self.apply_jitter(raw)))
    }

    /// A link that came back up resets the budget for the next loss
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn apply_jitter(&self, delay_ms: u64) -> u64 {
        if self.jitter_pct <= 0.0 || delay_ms == 0 {
            return delay_ms;
        }
        let spread = (delay_ms as f64 * self.jitter_pct) as u64;
        if spread == 0 {
            return delay_ms;
        }
        let offset = rand::thread_rng().gen_range(0..=spread * 2);
        // Shift into [delay - spread, delay + spread], floor at 1ms
        (delay_ms + offset).saturating_sub(spread).max(1)
    }
}

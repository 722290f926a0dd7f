//! Reconnection backoff.

use std::time::Duration;

/// Exponential backoff with jitter: `base * 2^(attempt-1)`, capped at
/// `max`, plus 0-1000 ms of jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget failures after a successful session.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Register a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(self.base_delay_ms(self.attempt) + jitter_ms())
    }

    /// Delay without jitter for `attempt` (1-based).
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        // attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
        let exponent = attempt.saturating_sub(1).min(10);
        self.base_ms.saturating_mul(1u64 << exponent).min(self.max_ms)
    }
}

/// Pseudo-random jitter in 0..1000 ms from the clock's sub-second nanos.
fn jitter_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}

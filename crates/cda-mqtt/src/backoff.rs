//! Reconnect backoff

use std::time::Duration;

/// Doubling delay between `min` and `max`
///
/// Non-decreasing across consecutive failures; `reset` returns it to `min`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
            failures: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Back to the minimum after a successful connection
    pub fn reset(&mut self) {
        self.current = self.min;
        self.failures = 0;
    }

    /// Delay the next call to `next_delay` will return
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Delays handed out since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

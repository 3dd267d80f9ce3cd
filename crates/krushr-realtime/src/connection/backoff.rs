use std::time::Duration;

/// Exponential reconnect schedule: `base * 2^attempts`, capped by attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(2_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Delay before the retry that follows `attempts` earlier retries, or
    /// `None` once the cap is reached.
    pub fn delay_for(&self, attempts: u32) -> Option<Duration> {
        if attempts >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempts)?;
        self.base.checked_mul(factor)
    }
}

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay added or removed at random, `0.0` disables it.
    pub jitter: f64,
}

impl RetryConfig {
    /// Linear backoff: the wait after attempt `n` is `base_delay_ms * n`, capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(u64::from(attempt))
            .min(self.max_delay_ms);

        Duration::from_millis(delay_ms)
    }
}

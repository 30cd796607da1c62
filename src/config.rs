//! Configuration types.

use std::time::Duration;

use rand::Rng;

/// Propagation engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent queue workers.
    pub workers: usize,
    /// Base delay before the first redelivery of a retried job.
    pub retry_base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub retry_max_delay: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 disables).
    pub retry_jitter: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(30),
            retry_jitter: 0.25,
        }
    }
}

impl EngineConfig {
    /// Compute the backoff delay for a redelivery.
    ///
    /// Exponential in the attempt number, capped at `retry_max_delay`,
    /// with random jitter so concurrent chains don't thunder in lockstep.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let base = self
            .retry_base_delay
            .saturating_mul(1u32 << exp)
            .min(self.retry_max_delay);
        if self.retry_jitter <= 0.0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.0..self.retry_jitter);
        base.mul_f64(1.0 + jitter).min(self.retry_max_delay)
    }
}

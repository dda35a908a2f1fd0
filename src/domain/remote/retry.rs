use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::api::computer_dto::RetryDto;
use crate::error::Result;

/// Exponential backoff with jitter for remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 5, initial_delay: Duration::from_millis(500), max_delay: Duration::from_secs(30) }
    }
}

impl From<&RetryDto> for RetryPolicy {
    fn from(dto: &RetryDto) -> Self {
        RetryPolicy {
            max_attempts: dto.max_attempts.max(1),
            initial_delay: Duration::from_millis(dto.initial_delay_ms),
            max_delay: Duration::from_millis(dto.max_delay_ms.max(dto.initial_delay_ms)),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the wait after the `attempt`-th failure (0-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff with jitter, uniformly drawn from the upper half of `backoff(attempt)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff(attempt).as_millis() as u64;
        let floor = ceiling / 2;
        Duration::from_millis(rand::rng().random_range(floor..=ceiling))
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or attempts run out.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    log::warn!("[Retry] {} failed (attempt {}/{}): {}. Retrying in {:?}", what, attempt + 1, self.max_attempts, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

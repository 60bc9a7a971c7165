//! Exponential backoff for transient network failures

use std::future::Future;
use std::time::Duration;

use crate::error::{FetchError, Result};

/// Backoff policy: base 1s, doubling, capped at 30s, 4 attempts total
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
            max_attempts: 4,
        }
    }
}

impl Backoff {
    /// Delay before the given retry (1-based attempt that just failed)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(exp).min(self.cap)
    }

    /// Run the operation, retrying transient failures until the policy is
    /// exhausted. Non-transient errors surface immediately.
    pub async fn run<T, F, Fut>(&self, url: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(FetchError::NetworkExhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

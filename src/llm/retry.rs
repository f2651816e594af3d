use crate::llm::error::BackendError;
use futures::future::BoxFuture;
use rand::Rng;
use std::time::Duration;

/// Bounded retry with exponential backoff and jitter.
///
/// Only transient failures are retried: rate limits, timeouts and unknown
/// errors. A `STREAM_ERROR` is never retried here because content may
/// already have been delivered to the caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub async fn run<T, F>(&self, mut operation: F) -> Result<T, BackendError>
    where
        F: FnMut() -> BoxFuture<'static, Result<T, BackendError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => match self.delay_for(&error, attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            "Backend attempt {}/{} failed ({}), retrying in {}ms",
                            attempt,
                            self.max_attempts,
                            error.kind(),
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(error),
                },
            }
        }
    }

    /// Delay before the next attempt, or `None` when the error is final.
    pub fn delay_for(&self, error: &BackendError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        match error {
            BackendError::RateLimit {
                retry_after: Some(wait),
                ..
            } => {
                // A server-requested wait longer than we are willing to hold
                // the request for is surfaced to the caller instead.
                (*wait <= self.max_delay).then_some(*wait)
            }
            BackendError::RateLimit { .. } | BackendError::Timeout(_) | BackendError::Unknown(_) => {
                Some(self.backoff(attempt))
            }
            _ => None,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(6)));
        let jitter_ms = self.base_delay.as_millis() as u64 / 2;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        (exp + jitter).min(self.max_delay)
    }
}

//! Bounded fixed-delay retry
//!
//! Wraps an async operation that either produces a value, defers (returns
//! `Ok(None)`), or fails. Deferrals and retryable errors are retried after a
//! cancellable `tokio` sleep; non-retryable errors propagate immediately.

use crate::config::ProvisionerConfig;
use crate::error::{Result, SigilError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1
    pub attempts: u32,
    pub delay: Duration,
    /// Upper bound of uniform random jitter added to each delay
    pub jitter: Option<Duration>,
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
            jitter: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = (!jitter.is_zero()).then_some(jitter);
        self
    }

    pub fn from_config(config: &ProvisionerConfig) -> Self {
        Self::fixed(config.retry_count, config.retry_backoff())
            .with_jitter(Duration::from_millis(config.retry_jitter_ms))
    }

    /// Delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        match self.jitter {
            Some(jitter) => {
                let extra = rand::rng().random_range(0..=jitter.as_millis() as u64);
                self.delay + Duration::from_millis(extra)
            }
            None => self.delay,
        }
    }

    /// Drive `op` until it yields a value or the attempts run out
    ///
    /// `op` receives the 1-based attempt number. On exhaustion the last error
    /// is returned, or `NotFound(what)` if every attempt deferred.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let mut last_error: Option<SigilError> = None;

        for attempt in 1..=self.attempts {
            match op(attempt).await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {
                    tracing::debug!("{}: attempt {}/{} deferred", what, attempt, self.attempts);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "{}: attempt {}/{} failed: {}",
                        what,
                        attempt,
                        self.attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.next_delay()).await;
            }
        }

        Err(last_error.unwrap_or_else(|| SigilError::NotFound(what.to_string())))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_millis(500))
    }
}

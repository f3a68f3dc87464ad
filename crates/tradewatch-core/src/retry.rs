//! Retry logic with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::duration_ms;
use crate::SourceError;

/// Immutable retry policy for one source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the backoff.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Deterministic part of the delay: `min(max_delay, base_delay * 2^attempt)`.
    ///
    /// `attempt` is 0-based; the first retry uses `attempt = 0`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let scale = 2_f64.powi(attempt.min(62) as i32);
        let seconds = (self.base_delay.as_secs_f64() * scale).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(seconds.max(0.0))
    }

    /// Backoff plus a uniform random jitter in `[0, jitter_ratio * backoff)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 {
            return backoff;
        }
        backoff + backoff.mul_f64(fastrand::f64() * ratio)
    }
}

/// Successful execution and how many invocations it took.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// Every allowed attempt failed with a retryable error, or the deadline left
    /// no room for another one.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: SourceError },
    /// Invalid or fatal failure. No further attempts were made.
    #[error("non-retryable failure on attempt {attempts}: {error}")]
    Rejected { attempts: u32, error: SourceError },
}

impl RetryError {
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Rejected { attempts, .. } => *attempts,
        }
    }

    pub const fn error(&self) -> &SourceError {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Rejected { error, .. } => error,
        }
    }
}

/// Runs an operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    /// Invoke `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    ///
    /// The operation receives the 1-based attempt number. A `retry_after` hint on
    /// the error raises the delay to at least that long. When `deadline` is set,
    /// a retry whose delay would end past it is not attempted.
    pub async fn execute<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let error = match operation(attempts).await {
                Ok(value) => return Ok(RetryOutcome { value, attempts }),
                Err(error) if !error.retryable() => {
                    return Err(RetryError::Rejected { attempts, error })
                }
                Err(error) => error,
            };

            if attempts >= max_attempts {
                warn!(attempts, code = error.code(), "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts,
                    last: error,
                });
            }

            let mut delay = policy.delay(attempts - 1);
            if let Some(retry_after) = error.retry_after() {
                delay = delay.max(retry_after);
            }

            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    warn!(
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "next retry would pass the deadline, giving up"
                    );
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: error,
                    });
                }
            }

            debug!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                code = error.code(),
                "retrying after retryable failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

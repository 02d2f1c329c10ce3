//! Bounded retry with exponential backoff for calls to external vendors.
//!
//! Quota exhaustion is never retried: it aborts on the first occurrence and is
//! re-signaled as [`RetryError::QuotaExceeded`] so callers can tell the user to come back later.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::core::config;
use crate::core::metrics;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt after the backoff delay
    Transient,
    /// Vendor quota or rate limit; stop now
    Quota,
    /// Another attempt would fail the same way
    Permanent,
}

/// Errors that know their own [`FailureClass`].
pub trait Retryable {
    fn failure_class(&self) -> FailureClass;
}

#[derive(Debug, Error, PartialEq)]
pub enum RetryError<E> {
    #[error("quota exceeded after {attempts} attempt(s)")]
    QuotaExceeded { attempts: u32, last_error: E },

    #[error("gave up after {attempts} attempt(s)")]
    MaxRetriesExhausted { attempts: u32, last_error: E },

    #[error("permanent failure")]
    NonRetryable { last_error: E },
}

impl<E> RetryError<E> {
    pub fn is_quota(&self) -> bool {
        matches!(self, RetryError::QuotaExceeded { .. })
    }

    /// Error of the final attempt.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::QuotaExceeded { last_error, .. }
            | RetryError::MaxRetriesExhausted { last_error, .. }
            | RetryError::NonRetryable { last_error } => last_error,
        }
    }
}

/// Attempt budget and backoff curve for one vendor call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first call
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: config::retry::MAX_RETRIES,
            initial_delay: config::retry::initial_delay(),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: config::retry::BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Pause before retry number `retry` (0 is the first retry), capped at `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Calls `operation` until it succeeds, fails permanently, hits a quota, or the
    /// retry budget runs out.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let last_error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match last_error.failure_class() {
                FailureClass::Quota => {
                    log::warn!("Quota exhausted on attempt {}, giving up: {}", attempts, last_error);
                    return Err(RetryError::QuotaExceeded { attempts, last_error });
                }
                FailureClass::Permanent => return Err(RetryError::NonRetryable { last_error }),
                FailureClass::Transient if attempts > self.max_retries => {
                    return Err(RetryError::MaxRetriesExhausted { attempts, last_error });
                }
                FailureClass::Transient => {
                    let pause = self.backoff(attempts - 1);
                    metrics::UPSTREAM_RETRIES_TOTAL.inc();
                    log::warn!(
                        "Attempt {} of {} failed, next in {:?}: {}",
                        attempts,
                        self.max_retries + 1,
                        pause,
                        last_error
                    );
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

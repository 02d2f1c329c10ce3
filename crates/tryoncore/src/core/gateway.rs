//! Rate-limited, retried access to one external vendor.

use std::future::Future;

use crate::core::dispatcher::RateLimitedDispatcher;
use crate::core::error::UpstreamError;
use crate::core::metrics;
use crate::core::retry::{RetryError, RetryPolicy};

/// A dispatcher slot wrapped around a retried call.
///
/// Retries happen inside the slot, so a retried call never lets another
/// caller's request slip in between its attempts.
#[derive(Clone)]
pub struct UpstreamGateway {
    dispatcher: RateLimitedDispatcher,
    retry: RetryPolicy,
}

impl UpstreamGateway {
    pub fn new(dispatcher: RateLimitedDispatcher, retry: RetryPolicy) -> Self {
        Self { dispatcher, retry }
    }

    pub fn dispatcher(&self) -> &RateLimitedDispatcher {
        &self.dispatcher
    }

    /// Runs `operation` through the dispatcher under the retry policy.
    ///
    /// Quota exhaustion surfaces as [`UpstreamError::QuotaExceeded`] after a single attempt.
    pub async fn call<F, Fut, T>(&self, op_name: &'static str, operation: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
        T: Send + 'static,
    {
        let retry = self.retry.clone();
        let outcome = self
            .dispatcher
            .enqueue(move || async move { retry.run(operation).await })
            .await;

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(RetryError::QuotaExceeded { last_error, .. })) => match last_error {
                UpstreamError::QuotaExceeded(msg) => UpstreamError::QuotaExceeded(msg),
                other => UpstreamError::QuotaExceeded(other.to_string()),
            },
            Ok(Err(retry_err)) => retry_err.into_inner(),
            Err(dispatch_err) => UpstreamError::Dispatch(dispatch_err.to_string()),
        };

        metrics::UPSTREAM_ERRORS_TOTAL
            .with_label_values(&[self.dispatcher.name(), err.kind()])
            .inc();
        log::warn!("{} via '{}' failed: {}", op_name, self.dispatcher.name(), err);
        Err(err)
    }
}

//! Retry, backoff and timeout policy for downstream calls.
//!
//! Uses `backon` for exponential backoff with jitter. Every attempt is
//! bounded by its own timeout; only transient failures (timeouts, 5xx,
//! 429, connection errors) are retried.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use domain::UpstreamError;

/// How a downstream call is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPolicy {
    /// Attempt ceiling, including the first attempt.
    pub max_attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// When false every call is attempted exactly once.
    pub retries_enabled: bool,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::forward()
    }
}

impl CallPolicy {
    /// Policy for forward saga steps.
    ///
    /// - Max attempts: 3
    /// - Min delay: 200ms
    /// - Max delay: 2s
    /// - Timeout: 5s per attempt
    pub fn forward() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            retries_enabled: true,
        }
    }

    /// Policy for inverse (compensating) calls, with a higher ceiling.
    pub fn compensation() -> Self {
        Self {
            max_attempts: 8,
            ..Self::forward()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay.max(min_delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables retries; each call gets a single attempt.
    pub fn without_retries(mut self) -> Self {
        self.retries_enabled = false;
        self
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> usize {
        if self.retries_enabled {
            self.max_attempts.saturating_sub(1)
        } else {
            0
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.retries())
            .with_jitter()
    }

    /// Runs `call` under this policy.
    ///
    /// `call` is invoked once per attempt. The last error is returned once
    /// the budget is spent or a non-transient error comes back.
    pub async fn call<T, F, Fut>(
        &self,
        service: &'static str,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let timeout = self.timeout;
        let mut attempt = 1usize;

        (|| {
            let fut = call();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(UpstreamError::timeout(
                        service,
                        format!("{operation} timed out after {}ms", timeout.as_millis()),
                    )),
                }
            }
        })
        .retry(self.backoff())
        .when(UpstreamError::is_transient)
        .notify(|err: &UpstreamError, delay: Duration| {
            metrics::counter!("downstream_call_retries_total", "service" => service)
                .increment(1);
            tracing::warn!(
                service,
                operation,
                attempt,
                error = %err,
                delay = ?delay,
                "Downstream call failed, retrying"
            );
            attempt += 1;
        })
        .await
    }
}

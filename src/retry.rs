//! Retry logic for store operations.
//!
//! Exponential backoff with jitter for transient failures. Only
//! [`StoreError::Transient`] is retried; everything else surfaces at once.

use crate::types::{Result, StoreError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries before giving up.
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds.
    pub max_backoff_ms: u64,
    /// Whether to add jitter to backoff times.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff_ms(mut self, initial_backoff_ms: u64) -> Self {
        self.initial_backoff_ms = initial_backoff_ms;
        self
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the backoff duration for a given attempt (0-based).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base_ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let capped_ms = base_ms.min(self.max_backoff_ms);

        let final_ms = if self.jitter {
            let jitter_range = capped_ms / 4; // 25% jitter
            let jitter = rand::rng().random_range(0..=jitter_range);
            capped_ms.saturating_add(jitter)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms)
    }
}

/// Sleep for `duration` unless cancelled first.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StoreError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run one attempt under a timeout, abandoning it on cancellation.
///
/// An elapsed timeout counts as a transient failure.
pub(crate) async fn attempt<T, Fut>(
    operation_name: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StoreError::Cancelled),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(result) => result,
            Err(_) => Err(StoreError::Transient(format!(
                "{} timed out after {}ms",
                operation_name,
                timeout.as_millis()
            ))),
        },
    }
}

/// Execute an async operation with retry logic.
///
/// Each attempt is bounded by `timeout`. Returns the result of the operation,
/// or the last error if all retries failed.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt_no = 0;

    loop {
        let err = match attempt(operation_name, timeout, cancel, operation()).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !err.is_transient() {
            tracing::debug!(
                operation = operation_name,
                attempt = attempt_no,
                error = %err,
                "Non-retryable error"
            );
            return Err(err);
        }

        if attempt_no >= config.max_retries {
            tracing::warn!(
                operation = operation_name,
                attempts = attempt_no + 1,
                error = %err,
                "Retries exhausted"
            );
            return Err(err);
        }

        let backoff = config.backoff_duration(attempt_no);
        tracing::warn!(
            operation = operation_name,
            attempt = attempt_no,
            error = %err,
            backoff_ms = backoff.as_millis() as u64,
            "Retryable error, backing off"
        );
        sleep_or_cancel(backoff, cancel).await?;
        attempt_no += 1;
    }
}

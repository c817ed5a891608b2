//! Retry with exponential backoff for connection attempts

use relay_foundation::{Error, Result, RetryConfig};
use serde::{Serialize, Serializer};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff schedule for one client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(rename = "initialDelayMs", serialize_with = "serialize_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(rename = "maxDelayMs", serialize_with = "serialize_millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

fn serialize_millis<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before the `retry`-th retry (1-based):
    /// `min(initial * multiplier^(retry - 1), max)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();

        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else if secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Run `f` until it succeeds or the policy is exhausted
///
/// The first attempt runs immediately. Without a policy there is exactly one
/// attempt. A non-retryable error ends the loop at once; otherwise the last
/// error is returned unchanged.
pub async fn retry_with_policy<F, Fut, T>(
    policy: Option<&RetryPolicy>,
    operation_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_retries = policy.map(|p| p.max_retries).unwrap_or(0);
    let mut last_error: Option<Error> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            if let Some(policy) = policy {
                let delay = policy.delay_for_retry(attempt);
                let reason = last_error.as_ref().map(|e| e.to_string()).unwrap_or_default();
                tracing::warn!(
                    operation = operation_name,
                    retry = attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Retrying after error"
                );
                sleep(delay).await;
            }
        }

        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                tracing::debug!(operation = operation_name, error = %e, "Not retrying");
                return Err(e);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Internal("No attempts made".to_string())))
}

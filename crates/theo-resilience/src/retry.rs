//! Exponential backoff retry executor.
//!
//! Only errors the caller's classifier marks retryable are retried; everything
//! else is returned immediately. Delay grows exponentially from `base_delay_ms`,
//! capped at `max_delay_ms`, with up to 20% jitter to avoid synchronized retries
//! across concurrent requests to the same provider.

use std::future::Future;
use std::time::Duration;
use theo_core::GatewayConfig;
use tokio::time::sleep;

/// Configuration for one retry run, normally derived from `GatewayConfig::resilience`.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl From<&theo_core::ResilienceConfig> for RetryConfig {
    fn from(cfg: &theo_core::ResilienceConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay_ms: cfg.base_delay_ms,
            max_delay_ms: cfg.max_delay_ms,
        }
    }
}

impl RetryConfig {
    pub fn from_gateway_config(config: &GatewayConfig) -> Self {
        Self::from(&config.resilience)
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = (self.base_delay_ms as f64) * 2f64.powi(attempt as i32);
        let capped = exponential.min(self.max_delay_ms as f64);
        let jitter_range = capped * 0.2;
        let jitter = rand::random::<f64>() * jitter_range;
        Duration::from_millis((capped + jitter - jitter_range / 2.0).max(0.0) as u64)
    }
}

/// Runs `operation` up to `config.max_retries + 1` times, sleeping between
/// attempts with exponential backoff. `is_retryable` classifies each error;
/// the first non-retryable error (or the last attempt's error) is returned.
///
/// An explicit `retry_after` hint on the error, when present, overrides the
/// computed backoff delay for that attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: RetryConfig,
    mut operation: F,
    is_retryable: impl Fn(&E) -> bool,
    retry_after_ms: impl Fn(&E) -> Option<u64>,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = is_retryable(&err);
                let hint = retry_after_ms(&err);
                last_error = Some(err);
                if !retryable || attempt == config.max_retries {
                    break;
                }
                let delay = hint
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| config.delay_for_attempt(attempt));
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after delay");
                sleep(delay).await;
            }
        }
    }

    Err(last_error.expect("loop runs at least once"))
}

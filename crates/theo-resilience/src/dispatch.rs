//! Per-provider resilience dispatcher combining a circuit breaker with the
//! retry executor, so adapters only ever see a single `execute` call.

use std::collections::HashMap;
use std::sync::Mutex;

use theo_core::{ErrorCode, GatewayError, GatewayConfig, ResilienceConfig};

use crate::circuit_breaker::{BreakerState, CircuitBreaker, Permit};
use crate::retry::{retry_with_backoff, RetryConfig};

#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    #[error("circuit breaker open for provider {0}")]
    CircuitOpen(String),
    #[error(transparent)]
    Upstream(#[from] GatewayError),
}

/// Holds one circuit breaker per provider name, lazily created on first use.
pub struct ResilienceLayer {
    resilience_config: ResilienceConfig,
    retry_config: RetryConfig,
    breakers: Mutex<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl ResilienceLayer {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            resilience_config: config.resilience.clone(),
            retry_config: RetryConfig::from_gateway_config(config),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn breaker_for(&self, provider: &str) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map mutex poisoned");
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(self.resilience_config.clone())))
            .clone()
    }

    pub fn breaker_state(&self, provider: &str) -> BreakerState {
        self.breaker_for(provider).state()
    }

    /// Runs `operation` under the named provider's circuit breaker and retry
    /// policy. Rejects immediately with `ResilienceError::CircuitOpen` when
    /// the breaker is open; otherwise retries per `theo_core::ErrorMetadata`
    /// classification and feeds outcomes back into the breaker.
    pub async fn execute<F, Fut, T>(
        &self,
        provider: &str,
        mut operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let breaker = self.breaker_for(provider);
        match breaker.try_acquire() {
            Permit::Rejected => return Err(ResilienceError::CircuitOpen(provider.to_string())),
            Permit::Allowed | Permit::AllowedAsProbe => {}
        }

        let retry_config = self.retry_config;
        let result = retry_with_backoff(
            retry_config,
            || operation(),
            |err: &GatewayError| err.metadata.retryable,
            |err: &GatewayError| err.metadata.retry_after_ms,
        )
        .await;

        match &result {
            Ok(_) => breaker.on_success(),
            Err(err) if err.code != ErrorCode::Cancelled => breaker.on_failure(),
            Err(_) => {}
        }

        result.map_err(ResilienceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use theo_core::{ErrorMetadata, RecoveryStrategy, Severity};

    fn gateway_config() -> GatewayConfig {
        GatewayConfig {
            data_dir: "/tmp".into(),
            pool: Default::default(),
            resilience: ResilienceConfig {
                max_retries: 2,
                base_delay_ms: 1,
                max_delay_ms: 5,
                failure_threshold: 2,
                time_window_ms: 60_000,
                open_timeout_ms: 50,
                success_threshold: 1,
            },
            providers: Default::default(),
            audit_log: Default::default(),
        }
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_calling_operation() {
        let layer = ResilienceLayer::new(&gateway_config());
        let breaker = layer.breaker_for("openai");
        breaker.force_state(BreakerState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<(), ResilienceError> = layer
            .execute("openai", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_failures_trip_the_breaker() {
        let layer = ResilienceLayer::new(&gateway_config());
        for _ in 0..2 {
            let _: Result<(), ResilienceError> = layer
                .execute("anthropic", || async {
                    Err(GatewayError::new(ErrorCode::ApiError, "anthropic", "boom")
                        .with_metadata(ErrorMetadata::new(false, Severity::Medium, RecoveryStrategy::Abort)))
                })
                .await;
        }
        assert_eq!(layer.breaker_state("anthropic"), BreakerState::Open);
    }

    #[tokio::test]
    async fn retryable_error_is_retried_then_succeeds() {
        let layer = ResilienceLayer::new(&gateway_config());
        let calls = AtomicU32::new(0);
        let result = layer
            .execute("google", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(GatewayError::new(ErrorCode::RateLimited, "google", "429"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(layer.breaker_state("google"), BreakerState::Closed);
    }
}

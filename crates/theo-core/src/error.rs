//! Shared error taxonomy emitted by adapters and consumed by the resilience layer.
//!
//! Every adapter error funnels through a per-provider mapping table into one
//! of these canonical codes before it reaches the caller as a terminal
//! `StreamChunk::Error` or a one-shot `Result::Err`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::stream::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    Truncate,
    Abort,
}

/// Metadata attached to every classified error: whether it is worth retrying,
/// how severe it is, what the resilience layer should do about it, and an
/// optional provider-supplied retry-after hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub retryable: bool,
    pub severity: Severity,
    pub recovery_strategy: RecoveryStrategy,
    pub retry_after_ms: Option<u64>,
}

impl ErrorMetadata {
    pub const fn new(
        retryable: bool,
        severity: Severity,
        recovery_strategy: RecoveryStrategy,
    ) -> Self {
        Self {
            retryable,
            severity,
            recovery_strategy,
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }
}

/// A classified gateway error, carrying the canonical code, the originating
/// provider, the original message and recovery metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: ErrorCode,
    pub provider: String,
    pub message: String,
    pub metadata: ErrorMetadata,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}: {}", self.provider, self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    pub fn new(code: ErrorCode, provider: impl Into<String>, message: impl Into<String>) -> Self {
        let metadata = default_metadata(code);
        Self {
            code,
            provider: provider.into(),
            message: message.into(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, metadata: ErrorMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn circuit_open(provider: impl Into<String>) -> Self {
        Self::new(ErrorCode::CircuitOpen, provider, "circuit breaker is open")
    }

    pub fn cancelled(provider: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, provider, "operation was cancelled")
    }
}

/// The fallback mapping for unknown errors: `API_ERROR`, non-retryable,
/// medium severity, fallback recovery.
fn default_metadata(code: ErrorCode) -> ErrorMetadata {
    match code {
        ErrorCode::AuthFailed => {
            ErrorMetadata::new(false, Severity::High, RecoveryStrategy::Fallback)
        }
        ErrorCode::RateLimited => {
            ErrorMetadata::new(true, Severity::Medium, RecoveryStrategy::Retry)
        }
        ErrorCode::InvalidRequest => {
            ErrorMetadata::new(false, Severity::Medium, RecoveryStrategy::Abort)
        }
        ErrorCode::ContextLengthExceeded => {
            ErrorMetadata::new(false, Severity::Medium, RecoveryStrategy::Truncate)
        }
        ErrorCode::InsufficientCredits => {
            ErrorMetadata::new(false, Severity::Critical, RecoveryStrategy::Abort)
        }
        ErrorCode::NetworkError => {
            ErrorMetadata::new(true, Severity::Medium, RecoveryStrategy::Retry)
        }
        ErrorCode::Timeout => ErrorMetadata::new(true, Severity::Medium, RecoveryStrategy::Retry),
        ErrorCode::ApiError => {
            ErrorMetadata::new(false, Severity::Medium, RecoveryStrategy::Fallback)
        }
        ErrorCode::Cancelled => {
            ErrorMetadata::new(false, Severity::Low, RecoveryStrategy::Abort)
        }
        ErrorCode::CircuitOpen => {
            ErrorMetadata::new(false, Severity::High, RecoveryStrategy::Fallback)
        }
    }
}

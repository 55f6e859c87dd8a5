//! Error-recovery escalation for session restoration at startup.
//!
//! Orthogonal to migration: this tracks how many times loading a given
//! session has failed, blacklists sessions that fail persistently, and
//! recommends a recovery option once the retry budget is exhausted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorType {
    FileNotFound,
    Corrupted,
    PermissionDenied,
    Unknown,
}

/// Classifies a restoration error by substring heuristics, matching the
/// source system's documented (if inexact) classification rules.
pub fn classify_error(message: &str) -> ErrorType {
    let lower = message.to_lowercase();
    if lower.contains("enoent") || lower.contains("not found") {
        ErrorType::FileNotFound
    } else if lower.contains("eacces") || lower.contains("permission") {
        ErrorType::PermissionDenied
    } else if lower.contains("parse") || lower.contains("corrupt") || lower.contains("invalid") {
        ErrorType::Corrupted
    } else {
        ErrorType::Unknown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEntry {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    pub error_type: ErrorType,
    pub recovery_attempted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub session_id: Uuid,
    pub total_failures: u32,
    pub failures: Vec<FailureEntry>,
    pub is_blacklisted: bool,
    pub blacklisted_until: Option<DateTime<Utc>>,
}

impl FailureRecord {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            total_failures: 0,
            failures: Vec::new(),
            is_blacklisted: false,
            blacklisted_until: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    pub max_retries: u32,
    pub blacklist_duration_ms: i64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for EscalationPolicy {
    /// 5 retries, doubling from 500ms up to a 30s ceiling, with a 10 minute
    /// blacklist once the budget is exhausted.
    fn default() -> Self {
        Self {
            max_retries: 5,
            blacklist_duration_ms: 10 * 60 * 1000,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl FailureRecord {
    pub fn record_failure(&mut self, error: &str, policy: &EscalationPolicy) {
        self.total_failures += 1;
        self.failures.push(FailureEntry {
            timestamp: Utc::now(),
            error: error.to_string(),
            error_type: classify_error(error),
            recovery_attempted: false,
        });
        if self.total_failures >= policy.max_retries {
            self.is_blacklisted = true;
            self.blacklisted_until =
                Some(Utc::now() + chrono::Duration::milliseconds(policy.blacklist_duration_ms));
        }
    }

    /// Expiry is lazy: a blacklist only actually lifts when this is called
    /// after the window has elapsed.
    pub fn is_problematic(&mut self) -> bool {
        if self.is_blacklisted {
            if let Some(until) = self.blacklisted_until {
                if Utc::now() >= until {
                    self.is_blacklisted = false;
                    self.blacklisted_until = None;
                }
            }
        }
        self.is_blacklisted
    }

    pub fn should_skip_session(&mut self) -> bool {
        self.is_problematic()
    }

    /// Exponential backoff delay before the next retry, or `-1` once the
    /// retry budget is exhausted.
    pub fn next_retry_delay_ms(&self, policy: &EscalationPolicy) -> i64 {
        if self.total_failures >= policy.max_retries {
            return -1;
        }
        let exponential = policy.base_delay_ms as f64 * 2f64.powi(self.total_failures as i32);
        exponential.min(policy.max_delay_ms as f64) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryOption {
    Retry,
    Skip,
    SelectDifferent,
    NewSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRecommendation {
    pub option: RecoveryOption,
    pub recommended: bool,
}

/// Always offers `{Retry?, Skip, SelectDifferent, NewSession}`, with the
/// recommended flag escalating as `total_failures` grows: `<=2` retry,
/// `>=3` new session, `>=5` skip. `Retry` is omitted once the retry budget
/// is exhausted.
pub fn recovery_options(record: &FailureRecord, policy: &EscalationPolicy) -> Vec<RecoveryRecommendation> {
    let mut options = Vec::new();
    if record.total_failures < policy.max_retries {
        options.push(RecoveryRecommendation {
            option: RecoveryOption::Retry,
            recommended: record.total_failures <= 2,
        });
    }
    options.push(RecoveryRecommendation {
        option: RecoveryOption::Skip,
        recommended: record.total_failures >= 5,
    });
    options.push(RecoveryRecommendation {
        option: RecoveryOption::SelectDifferent,
        recommended: false,
    });
    options.push(RecoveryRecommendation {
        option: RecoveryOption::NewSession,
        recommended: record.total_failures >= 3,
    });
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> EscalationPolicy {
        EscalationPolicy {
            max_retries: 2,
            blacklist_duration_ms: 200,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
        }
    }

    #[test]
    fn classifies_common_error_substrings() {
        assert_eq!(classify_error("ENOENT: file not found"), ErrorType::FileNotFound);
        assert_eq!(classify_error("EACCES: permission denied"), ErrorType::PermissionDenied);
        assert_eq!(classify_error("failed to parse JSON"), ErrorType::Corrupted);
        assert_eq!(classify_error("something weird happened"), ErrorType::Unknown);
    }

    #[test]
    fn two_failures_trip_blacklist_at_max_retries_two() {
        let mut record = FailureRecord::new(Uuid::new_v4());
        let policy = policy();
        record.record_failure("not found", &policy);
        assert!(!record.is_problematic());
        record.record_failure("not found again", &policy);
        assert!(record.is_problematic());
    }

    #[test]
    fn retry_delay_doubles_then_reports_exhausted() {
        let mut record = FailureRecord::new(Uuid::new_v4());
        let policy = policy();
        assert_eq!(record.next_retry_delay_ms(&policy), 100);
        record.record_failure("x", &policy);
        assert_eq!(record.next_retry_delay_ms(&policy), 200);
        record.record_failure("x", &policy);
        assert_eq!(record.next_retry_delay_ms(&policy), -1);
    }

    #[test]
    fn recovery_options_escalate_with_failure_count() {
        let mut record = FailureRecord::new(Uuid::new_v4());
        let policy = EscalationPolicy {
            max_retries: 10,
            ..policy()
        };
        for _ in 0..5 {
            record.record_failure("x", &policy);
        }
        let options = recovery_options(&record, &policy);
        let skip = options
            .iter()
            .find(|o| o.option == RecoveryOption::Skip)
            .unwrap();
        assert!(skip.recommended);
        let new_session = options
            .iter()
            .find(|o| o.option == RecoveryOption::NewSession)
            .unwrap();
        assert!(new_session.recommended);
    }

    #[test]
    fn new_session_is_always_available() {
        let record = FailureRecord::new(Uuid::new_v4());
        let options = recovery_options(&record, &policy());
        assert!(options.iter().any(|o| o.option == RecoveryOption::NewSession));
    }
}

//! Startup session-restoration coordinator.
//!
//! Wraps a [`FileSessionStore`] with the failure/escalation bookkeeping from
//! `failure.rs`: each failed restore attempt is recorded against the
//! session's [`FailureRecord`], a session that exceeds the retry budget is
//! blacklisted and skipped on subsequent attempts without touching disk
//! again, and the coordinator reports recovery options once retries are
//! exhausted rather than just propagating the raw error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::failure::{recovery_options, EscalationPolicy, FailureRecord, RecoveryRecommendation};
use crate::model::Session;
use crate::store::FileSessionStore;

/// Outcome of one restoration attempt through the coordinator.
#[derive(Debug)]
pub enum RestoreOutcome {
    /// The session (and, if its schema was stale, the migration result) was
    /// loaded successfully.
    Restored {
        session: Session,
        migrated: bool,
    },
    /// The session is blacklisted after repeated prior failures; skipped
    /// without touching disk.
    Skipped,
    /// The attempt failed; `recovery` lists the options a caller can offer
    /// the user (retry, skip, select a different session, start fresh).
    Failed {
        error: String,
        recovery: Vec<RecoveryRecommendation>,
    },
}

/// Coordinates restoration attempts across a process lifetime, tracking
/// failures per session id so a persistently-broken session doesn't retry
/// forever.
pub struct SessionRecoveryCoordinator {
    store: Arc<FileSessionStore>,
    policy: EscalationPolicy,
    failures: Mutex<HashMap<Uuid, FailureRecord>>,
}

impl SessionRecoveryCoordinator {
    pub fn new(store: Arc<FileSessionStore>, policy: EscalationPolicy) -> Self {
        Self {
            store,
            policy,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_policy(store: Arc<FileSessionStore>) -> Self {
        Self::new(store, EscalationPolicy::default())
    }

    /// Attempts to restore session `id`, updating its failure record on
    /// error. Every failed or skipped attempt logs a warning naming the
    /// session id and its on-disk path.
    pub async fn restore(&self, id: Uuid) -> RestoreOutcome {
        {
            let mut failures = self.failures.lock().await;
            let record = failures.entry(id).or_insert_with(|| FailureRecord::new(id));
            if record.should_skip_session() {
                tracing::warn!(
                    session_id = %id,
                    path = %self.store.session_path(id).display(),
                    "skipping session restore: blacklisted after repeated failures"
                );
                return RestoreOutcome::Skipped;
            }
        }

        match self.store.get_session_with_migration(id).await {
            Ok(Some((session, migration))) => {
                let mut failures = self.failures.lock().await;
                failures.remove(&id);
                RestoreOutcome::Restored {
                    session,
                    migrated: migration.is_some(),
                }
            }
            Ok(None) => self.record_failure(id, "session file not found").await,
            Err(err) => self.record_failure(id, &err.to_string()).await,
        }
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> RestoreOutcome {
        let mut failures = self.failures.lock().await;
        let record = failures.entry(id).or_insert_with(|| FailureRecord::new(id));
        record.record_failure(error, &self.policy);
        tracing::warn!(
            session_id = %id,
            path = %self.store.session_path(id).display(),
            error = error,
            "failed to restore session"
        );
        RestoreOutcome::Failed {
            error: error.to_string(),
            recovery: recovery_options(record, &self.policy),
        }
    }

    /// The current failure record for a session, if any attempt has failed.
    pub async fn failure_record(&self, id: Uuid) -> Option<FailureRecord> {
        self.failures.lock().await.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStore;
    use tempfile::tempdir;

    fn test_policy() -> EscalationPolicy {
        EscalationPolicy {
            max_retries: 2,
            blacklist_duration_ms: 60_000,
            base_delay_ms: 10,
            max_delay_ms: 100,
        }
    }

    #[tokio::test]
    async fn restoring_an_existing_session_succeeds_without_migration() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
        let session = Session::new("openai", "gpt-test", "/repo");
        let id = session.id;
        store.create_session(session).await.unwrap();

        let coordinator = SessionRecoveryCoordinator::new(store, test_policy());
        match coordinator.restore(id).await {
            RestoreOutcome::Restored { session, migrated } => {
                assert_eq!(session.id, id);
                assert!(!migrated);
            }
            other => panic!("expected Restored, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_failures_trip_the_blacklist_and_subsequent_attempts_are_skipped() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
        let coordinator = SessionRecoveryCoordinator::new(store, test_policy());
        let missing_id = Uuid::new_v4();

        for _ in 0..2 {
            let outcome = coordinator.restore(missing_id).await;
            assert!(matches!(outcome, RestoreOutcome::Failed { .. }));
        }

        match coordinator.restore(missing_id).await {
            RestoreOutcome::Skipped => {}
            other => panic!("expected Skipped after exhausting retries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_attempts_report_escalating_recovery_options() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
        let coordinator = SessionRecoveryCoordinator::new(store, test_policy());
        let missing_id = Uuid::new_v4();

        let outcome = coordinator.restore(missing_id).await;
        let RestoreOutcome::Failed { recovery, .. } = outcome else {
            panic!("expected Failed");
        };
        assert!(recovery
            .iter()
            .any(|r| r.option == crate::failure::RecoveryOption::Retry));
    }

    #[tokio::test]
    async fn successful_restore_clears_a_prior_failure_record() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileSessionStore::open(dir.path()).await.unwrap());
        let session = Session::new("openai", "gpt-test", "/repo");
        let id = session.id;

        let coordinator = SessionRecoveryCoordinator::new(Arc::clone(&store), test_policy());
        // Fails once before the session exists on disk.
        let _ = coordinator.restore(id).await;
        assert!(coordinator.failure_record(id).await.is_some());

        store.create_session(session).await.unwrap();
        let outcome = coordinator.restore(id).await;
        assert!(matches!(outcome, RestoreOutcome::Restored { .. }));
        assert!(coordinator.failure_record(id).await.is_none());
    }
}

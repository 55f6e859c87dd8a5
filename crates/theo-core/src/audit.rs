//! Append-only audit trail (Component F).
//!
//! Every operation worth auditing — a generate call, a credential
//! resolution, a session restore — is recorded as one line of JSON,
//! regardless of outcome. Rotation is size-triggered: when the active file
//! would exceed `max_bytes`, it is renamed aside with a numeric suffix and a
//! fresh file is started, keeping at most `max_files` rotated generations.
//! Token material is never written here — see `theo-auth`'s `SecretStore`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::AuditLogConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

/// One line of the append-only audit log, per §6: the operation performed,
/// who performed it, whether it succeeded, and an optional free-form
/// `context` payload (never token material — see module docs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub operation: String,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl AuditRecord {
    /// Builds a record for a successful operation.
    pub fn success(operation: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: AuditLevel::Info,
            operation: operation.into(),
            actor: actor.into(),
            session_id: None,
            result: AuditResult::Success,
            duration_ms: None,
            error: None,
            context: None,
        }
    }

    /// Builds a record for a failed operation at `warn` level (escalate to
    /// `error` with [`AuditRecord::at_level`] for fatal-class failures).
    pub fn failure(operation: impl Into<String>, actor: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: AuditLevel::Warn,
            operation: operation.into(),
            actor: actor.into(),
            session_id: None,
            result: AuditResult::Failure,
            duration_ms: None,
            error: Some(error.into()),
            context: None,
        }
    }

    pub fn at_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to open audit log {0:?}: {1}")]
    Open(PathBuf, std::io::Error),
    #[error("failed to write audit record: {0}")]
    Write(std::io::Error),
    #[error("failed to rotate audit log {0:?}: {1}")]
    Rotate(PathBuf, std::io::Error),
    #[error("failed to serialize audit record: {0}")]
    Serialize(serde_json::Error),
}

struct WriterState {
    file: File,
    bytes_written: u64,
}

/// Thread-safe JSONL audit logger. A single logger instance is shared across
/// all in-flight requests; writes are serialized behind an internal mutex.
/// This is the one process-wide mutable singleton the workspace allows (see
/// `SPEC_FULL.md` §9): its lifecycle is init-once (`open`) and teardown-once
/// (dropped with the process), never re-created mid-run.
pub struct AuditLogger {
    config: AuditLogConfig,
    state: Mutex<WriterState>,
}

impl AuditLogger {
    pub fn open(config: AuditLogConfig) -> Result<Self, AuditError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .map_err(|e| AuditError::Open(config.path.clone(), e))?;
        let bytes_written = file
            .metadata()
            .map_err(|e| AuditError::Open(config.path.clone(), e))?
            .len();
        Ok(Self {
            config,
            state: Mutex::new(WriterState {
                file,
                bytes_written,
            }),
        })
    }

    /// Appends one record, rotating the active file first if it has grown
    /// past `max_bytes`. Audit-log failures are deliberately swallowed by
    /// callers that only log a warning (see `theo-session`'s restore path)
    /// rather than aborting the operation being audited.
    pub fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record).map_err(AuditError::Serialize)?;
        line.push(b'\n');

        let mut state = self.state.lock().expect("audit logger mutex poisoned");
        if state.bytes_written + line.len() as u64 > self.config.max_bytes {
            self.rotate(&mut state)?;
        }
        state.file.write_all(&line).map_err(AuditError::Write)?;
        state.bytes_written += line.len() as u64;
        Ok(())
    }

    /// Rotates `.1` through `.{max_files-1}` up a generation, drops anything
    /// that would land past `max_files`, and starts a fresh active file.
    fn rotate(&self, state: &mut WriterState) -> Result<(), AuditError> {
        let oldest = rotated_path(&self.config.path, self.config.max_files);
        let _ = std::fs::remove_file(&oldest);

        for gen in (1..self.config.max_files).rev() {
            let from = rotated_path(&self.config.path, gen);
            let to = rotated_path(&self.config.path, gen + 1);
            if from.exists() {
                let _ = std::fs::rename(&from, &to);
            }
        }
        let first_rotated = rotated_path(&self.config.path, 1);
        std::fs::rename(&self.config.path, &first_rotated)
            .map_err(|e| AuditError::Rotate(self.config.path.clone(), e))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .map_err(|e| AuditError::Open(self.config.path.clone(), e))?;
        state.file = file;
        state.bytes_written = 0;
        Ok(())
    }
}

fn rotated_path(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cfg(dir: &Path, max_bytes: u64) -> AuditLogConfig {
        AuditLogConfig {
            path: dir.join("audit.jsonl"),
            max_bytes,
            max_files: 3,
        }
    }

    #[test]
    fn records_append_as_jsonl() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::open(cfg(dir.path(), 1_000_000)).unwrap();
        logger.record(&AuditRecord::success("generate", "openai:gpt-test")).unwrap();
        logger.record(&AuditRecord::success("generate", "openai:gpt-test")).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let parsed: AuditRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.actor, "openai:gpt-test");
            assert_eq!(parsed.result, AuditResult::Success);
        }
    }

    #[test]
    fn exceeding_max_bytes_rotates_the_file() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::open(cfg(dir.path(), 10)).unwrap();
        logger.record(&AuditRecord::success("generate", "openai:gpt-test")).unwrap();
        logger.record(&AuditRecord::success("generate", "openai:gpt-test")).unwrap();

        assert!(dir.path().join("audit.jsonl.1").exists());
        let active = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        assert_eq!(active.lines().count(), 1);
    }

    #[test]
    fn rotation_past_max_files_drops_the_oldest_generation() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::open(cfg(dir.path(), 1)).unwrap();
        for _ in 0..6 {
            logger.record(&AuditRecord::success("generate", "actor")).unwrap();
        }
        assert!(!dir.path().join("audit.jsonl.4").exists());
        assert!(dir.path().join("audit.jsonl.3").exists());
    }

    #[test]
    fn failure_record_carries_error_and_session_id() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::open(cfg(dir.path(), 1_000_000)).unwrap();
        let session_id = Uuid::new_v4();
        let record = AuditRecord::failure("session.restore", "session-manager", "ENOENT: not found")
            .with_session(session_id)
            .at_level(AuditLevel::Error);
        logger.record(&record).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("audit.jsonl")).unwrap();
        let parsed: AuditRecord = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.result, AuditResult::Failure);
        assert_eq!(parsed.level, AuditLevel::Error);
        assert_eq!(parsed.session_id, Some(session_id));
        assert_eq!(parsed.error.as_deref(), Some("ENOENT: not found"));
    }
}

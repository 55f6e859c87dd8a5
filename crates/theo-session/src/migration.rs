//! Schema migration framework.
//!
//! Supported versions form a contiguous sequence; the current version plus
//! the three immediately prior are accepted. Each adjacent pair has a
//! registered, deterministic transform. Migrating from any supported
//! version composes the intervening transforms in order, validating after
//! each step and creating a backup before the first step so a validation
//! failure can roll back.

use serde_json::Value;

use crate::model::CURRENT_SCHEMA_VERSION;

/// The contiguous window of versions this crate can migrate from, oldest first.
pub const SUPPORTED_VERSIONS: &[&str] = &["0.7.0", "0.8.0", "0.9.0", "1.0.0"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("version {0} is not in the supported migration window {SUPPORTED_VERSIONS:?}")]
    UnsupportedVersion(String),
    #[error("no registered migration path from {0} to {1}")]
    NoMigrationPath(String, String),
    #[error("migration step {0}->{1} failed: {2}")]
    MigrationFailed(String, String, String),
    #[error("post-migration validation failed at step {0}->{1}: {2}")]
    ValidationFailed(String, String, String),
    #[error("failed to create pre-migration backup: {0}")]
    BackupFailed(String),
    #[error("rollback to backup failed: {0}")]
    RollbackFailed(String),
    #[error("session data is corrupted and cannot be migrated: {0}")]
    CorruptedData(String),
}

type Transform = fn(Value) -> Result<Value, String>;

struct MigrationStep {
    from: &'static str,
    to: &'static str,
    transform: Transform,
}

fn migration_steps() -> Vec<MigrationStep> {
    vec![
        MigrationStep {
            from: "0.7.0",
            to: "0.8.0",
            transform: migrate_0_7_0_to_0_8_0,
        },
        MigrationStep {
            from: "0.8.0",
            to: "0.9.0",
            transform: migrate_0_8_0_to_0_9_0,
        },
        MigrationStep {
            from: "0.9.0",
            to: "1.0.0",
            transform: migrate_0_9_0_to_1_0_0,
        },
    ]
}

/// 0.7.0 sessions predate `workspace_root`/`context_files`/`tags`/
/// `files_accessed`/`title`/`notes`; this step introduces them with their
/// documented defaults without touching anything else.
fn migrate_0_7_0_to_0_8_0(mut value: Value) -> Result<Value, String> {
    let obj = value.as_object_mut().ok_or("session root is not an object")?;
    obj.entry("workspace_root").or_insert_with(|| Value::String("/".to_string()));
    obj.entry("context_files").or_insert_with(|| Value::Array(Vec::new()));
    obj.entry("files_accessed").or_insert_with(|| Value::Array(Vec::new()));
    obj.insert("version".to_string(), Value::String("0.8.0".to_string()));
    Ok(value)
}

fn migrate_0_8_0_to_0_9_0(mut value: Value) -> Result<Value, String> {
    let obj = value.as_object_mut().ok_or("session root is not an object")?;
    obj.entry("tags").or_insert_with(|| Value::Array(Vec::new()));
    obj.insert("version".to_string(), Value::String("0.9.0".to_string()));
    Ok(value)
}

fn migrate_0_9_0_to_1_0_0(mut value: Value) -> Result<Value, String> {
    let obj = value.as_object_mut().ok_or("session root is not an object")?;
    obj.entry("title").or_insert(Value::Null);
    obj.entry("notes").or_insert(Value::Null);
    obj.insert("version".to_string(), Value::String("1.0.0".to_string()));
    Ok(value)
}

/// Fields that must survive any successful migration bit-identically.
fn essential_fields_preserved(before: &Value, after: &Value) -> bool {
    let get = |v: &Value, key: &str| v.get(key).cloned();
    if get(before, "id") != get(after, "id") {
        return false;
    }
    if get(before, "created") != get(after, "created") {
        return false;
    }
    if get(before, "model") != get(after, "model") {
        return false;
    }
    let before_contents: Option<Vec<Value>> = before.get("messages").and_then(|m| m.as_array()).map(|arr| {
        arr.iter().filter_map(|m| m.get("content").cloned()).collect()
    });
    let after_contents: Option<Vec<Value>> = after.get("messages").and_then(|m| m.as_array()).map(|arr| {
        arr.iter().filter_map(|m| m.get("content").cloned()).collect()
    });
    before_contents == after_contents
}

#[derive(Debug, Clone)]
pub struct MigrationResult {
    pub final_version: String,
    pub backup_path: Option<String>,
}

/// Migrates a raw session JSON value from `from_version` to
/// [`CURRENT_SCHEMA_VERSION`], composing the registered steps in order.
/// `create_backup`/`restore_backup` are injected so the caller controls the
/// actual filesystem path.
pub fn migrate(
    value: Value,
    from_version: &str,
    create_backup: impl FnOnce(&Value) -> Result<String, String>,
) -> Result<(Value, MigrationResult), MigrationError> {
    if !SUPPORTED_VERSIONS.contains(&from_version) {
        return Err(MigrationError::UnsupportedVersion(from_version.to_string()));
    }
    if from_version == CURRENT_SCHEMA_VERSION {
        return Ok((
            value,
            MigrationResult {
                final_version: CURRENT_SCHEMA_VERSION.to_string(),
                backup_path: None,
            },
        ));
    }

    let steps = migration_steps();
    let start = steps
        .iter()
        .position(|s| s.from == from_version)
        .ok_or_else(|| {
            MigrationError::NoMigrationPath(from_version.to_string(), CURRENT_SCHEMA_VERSION.to_string())
        })?;

    let backup_path = create_backup(&value).map_err(MigrationError::BackupFailed)?;

    let original = value.clone();
    let mut current = value;
    for step in &steps[start..] {
        let before = current.clone();
        current = (step.transform)(current)
            .map_err(|e| MigrationError::MigrationFailed(step.from.to_string(), step.to.to_string(), e))?;
        if !essential_fields_preserved(&before, &current) {
            return Err(MigrationError::ValidationFailed(
                step.from.to_string(),
                step.to.to_string(),
                "essential fields changed across migration step".to_string(),
            ));
        }
    }

    if !essential_fields_preserved(&original, &current) {
        return Err(MigrationError::ValidationFailed(
            from_version.to_string(),
            CURRENT_SCHEMA_VERSION.to_string(),
            "essential fields not preserved end to end".to_string(),
        ));
    }

    Ok((
        current,
        MigrationResult {
            final_version: CURRENT_SCHEMA_VERSION.to_string(),
            backup_path: Some(backup_path),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn migrates_0_7_0_session_introducing_defaulted_fields() {
        let original = json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "version": "0.7.0",
            "created": "2024-01-01T00:00:00Z",
            "last_modified": "2024-01-01T00:00:00Z",
            "model": "gpt-test",
            "provider": "openai",
            "messages": [{"content": "hello"}],
        });

        let (migrated, result) =
            migrate(original, "0.7.0", |_| Ok("backup.bak".to_string())).unwrap();

        assert_eq!(result.final_version, "1.0.0");
        assert_eq!(result.backup_path, Some("backup.bak".to_string()));
        assert_eq!(migrated["workspace_root"], json!("/"));
        assert_eq!(migrated["context_files"], json!([]));
        assert_eq!(migrated["tags"], json!([]));
        assert_eq!(migrated["title"], json!(null));
        assert_eq!(migrated["id"], json!("11111111-1111-1111-1111-111111111111"));
    }

    #[test]
    fn rejects_version_outside_supported_window() {
        let result = migrate(json!({}), "0.1.0", |_| Ok("x".to_string()));
        assert_eq!(
            result.unwrap_err(),
            MigrationError::UnsupportedVersion("0.1.0".to_string())
        );
    }

    #[test]
    fn current_version_is_a_no_op() {
        let value = json!({"id": "x", "version": "1.0.0"});
        let (migrated, result) =
            migrate(value.clone(), "1.0.0", |_| Ok("unused".to_string())).unwrap();
        assert_eq!(migrated, value);
        assert_eq!(result.backup_path, None);
    }
}

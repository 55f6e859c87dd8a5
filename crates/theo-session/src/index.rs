//! `index.json`: a durable mapping from session id to lightweight metadata,
//! kept consistent with the session files on disk by the Validator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use crate::model::SessionMetadata;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionIndex {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub entries: HashMap<Uuid, SessionMetadata>,
}

impl Default for SessionIndex {
    fn default() -> Self {
        Self {
            version: crate::model::CURRENT_SCHEMA_VERSION.to_string(),
            last_updated: Utc::now(),
            entries: HashMap::new(),
        }
    }
}

impl SessionIndex {
    pub fn insert(&mut self, metadata: SessionMetadata) {
        self.entries.insert(metadata.id, metadata);
        self.last_updated = Utc::now();
    }

    pub fn remove(&mut self, id: &Uuid) {
        if self.entries.remove(id).is_some() {
            self.last_updated = Utc::now();
        }
    }
}

/// Result of comparing `index.json` against the session files actually
/// present on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub total_sessions: usize,
    pub valid_sessions: usize,
    pub orphaned_entries: Vec<Uuid>,
    pub orphaned_files: Vec<Uuid>,
    pub corrupted_entries: Vec<Uuid>,
}

/// Compares the index against the session ids found by scanning the session
/// directory. Does not touch disk beyond the provided `present_files` set.
pub fn validate(index: &SessionIndex, present_files: &[Uuid]) -> ValidationReport {
    let mut report = ValidationReport {
        total_sessions: index.entries.len(),
        ..Default::default()
    };

    for id in index.entries.keys() {
        if present_files.contains(id) {
            report.valid_sessions += 1;
        } else {
            report.orphaned_entries.push(*id);
        }
    }
    for id in present_files {
        if !index.entries.contains_key(id) {
            report.orphaned_files.push(*id);
        }
    }
    report
}

/// Removes orphaned index entries in place; orphaned files are left on disk
/// (registered by the caller, not deleted here) per the non-destructive
/// cleanup policy.
pub fn cleanup_orphaned_entries(index: &mut SessionIndex, report: &ValidationReport) {
    for id in &report.orphaned_entries {
        index.remove(id);
    }
}

pub fn index_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join("sessions").join("index.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: Uuid) -> SessionMetadata {
        SessionMetadata {
            id,
            provider: "openai".into(),
            model: "gpt-test".into(),
            created: Utc::now(),
            last_modified: Utc::now(),
            title: None,
            message_count: 0,
        }
    }

    #[test]
    fn detects_orphaned_entry_and_file() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let d = Uuid::new_v4();

        let mut index = SessionIndex::default();
        index.insert(meta(a));
        index.insert(meta(b));
        index.insert(meta(c));

        let report = validate(&index, &[a, c, d]);
        assert_eq!(report.orphaned_entries, vec![b]);
        assert_eq!(report.orphaned_files, vec![d]);
        assert_eq!(report.valid_sessions, 2);
    }

    #[test]
    fn cleanup_removes_zero_orphans_afterward() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut index = SessionIndex::default();
        index.insert(meta(a));
        index.insert(meta(b));

        let report = validate(&index, &[a]);
        cleanup_orphaned_entries(&mut index, &report);

        let report_after = validate(&index, &[a]);
        assert!(report_after.orphaned_entries.is_empty());
    }
}

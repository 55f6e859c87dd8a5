//! Filesystem-backed `SessionStore`: atomic writes, an `index.json` kept in
//! sync, and a per-session lock so concurrent writers to the same session
//! serialize instead of racing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::envelope::{EnvelopeError, SessionEnvelope};
use crate::index::{self, SessionIndex, ValidationReport};
use crate::migration::{self, MigrationError, MigrationResult};
use crate::model::{Session, SessionMetadata, CURRENT_SCHEMA_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session not found: {0}")]
    NotFound(Uuid),
    #[error("session already exists: {0}")]
    AlreadyExists(Uuid),
    #[error("filesystem error for session {0}: {1}")]
    Io(Uuid, std::io::Error),
    #[error("envelope error for session {0}: {1}")]
    Envelope(Uuid, EnvelopeError),
    #[error("index I/O error: {0}")]
    IndexIo(std::io::Error),
    #[error("index is corrupted: {0}")]
    IndexCorrupt(serde_json::Error),
    #[error("session {0} is missing a version field and cannot be migrated")]
    MissingVersion(Uuid),
    #[error("migration of session {0} failed: {1}")]
    Migration(Uuid, MigrationError),
    #[error("session {0} migrated successfully but no longer deserializes: {1}")]
    MigratedDataInvalid(Uuid, serde_json::Error),
}

#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn create_session(&self, session: Session) -> Result<(), SessionStoreError>;
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, SessionStoreError>;
    async fn update_session(&self, session: &Session) -> Result<(), SessionStoreError>;
    async fn delete_session(&self, id: Uuid) -> Result<(), SessionStoreError>;
    async fn list_metadata(&self) -> Result<Vec<SessionMetadata>, SessionStoreError>;
}

/// One lock per session id, so writes to distinct sessions proceed
/// independently while writes to the same session serialize.
#[derive(Default)]
struct LockTable {
    locks: std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table mutex poisoned");
        locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

pub struct FileSessionStore {
    data_dir: PathBuf,
    locks: LockTable,
    index: Mutex<SessionIndex>,
}

impl FileSessionStore {
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let data_dir = data_dir.into();
        let sessions_dir = sessions_dir(&data_dir);
        tokio::fs::create_dir_all(&sessions_dir)
            .await
            .map_err(SessionStoreError::IndexIo)?;

        let index_path = index::index_path(&data_dir);
        let index = if index_path.exists() {
            let bytes = tokio::fs::read(&index_path).await.map_err(SessionStoreError::IndexIo)?;
            serde_json::from_slice(&bytes).map_err(SessionStoreError::IndexCorrupt)?
        } else {
            SessionIndex::default()
        };

        Ok(Self {
            data_dir,
            locks: LockTable::default(),
            index: Mutex::new(index),
        })
    }

    pub fn session_path(&self, id: Uuid) -> PathBuf {
        sessions_dir(&self.data_dir).join(format!("{id}.json"))
    }

    fn backup_path(&self, id: Uuid, from_version: &str) -> PathBuf {
        backups_dir(&self.data_dir).join(format!("{id}-{from_version}.bak.json"))
    }

    /// Writes a pre-migration backup of the raw session data alongside the
    /// live store, under `sessions/backups/`. Synchronous: this runs inside
    /// the `migrate` closure contract, which is deliberately not async so
    /// the migration framework stays filesystem-agnostic.
    fn write_backup(&self, id: Uuid, from_version: &str, data: &serde_json::Value) -> Result<String, String> {
        let dir = backups_dir(&self.data_dir);
        std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
        let path = self.backup_path(id, from_version);
        let bytes = serde_json::to_vec_pretty(data).map_err(|e| e.to_string())?;
        std::fs::write(&path, bytes).map_err(|e| e.to_string())?;
        Ok(path.display().to_string())
    }

    async fn write_index(&self, index: &SessionIndex) -> Result<(), SessionStoreError> {
        let path = index::index_path(&self.data_dir);
        let bytes = serde_json::to_vec_pretty(index).map_err(SessionStoreError::IndexCorrupt)?;
        atomic_write(&path, &bytes)
            .await
            .map_err(SessionStoreError::IndexIo)
    }

    /// Scans the session directory for `<uuid>.json` files, for index
    /// validation against what is actually on disk.
    async fn present_session_ids(&self) -> Result<Vec<Uuid>, SessionStoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(sessions_dir(&self.data_dir))
            .await
            .map_err(SessionStoreError::IndexIo)?;
        while let Some(entry) = entries.next_entry().await.map_err(SessionStoreError::IndexIo)? {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Reads a session, migrating it in place if its on-disk schema version
    /// predates [`CURRENT_SCHEMA_VERSION`]. A pre-migration backup is written
    /// under `sessions/backups/` before any transform runs; if the migrated
    /// data fails validation the backup is left in place and the error is
    /// returned without touching the live file. On success the migrated
    /// session is persisted back to its original path atomically.
    ///
    /// Returns `Some((session, migration_result))` with `migration_result`
    /// only present when a migration actually ran.
    pub async fn get_session_with_migration(
        &self,
        id: Uuid,
    ) -> Result<Option<(Session, Option<MigrationResult>)>, SessionStoreError> {
        let path = self.session_path(id);
        if !tokio::fs::try_exists(&path).await.map_err(|e| SessionStoreError::Io(id, e))? {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await.map_err(|e| SessionStoreError::Io(id, e))?;
        let raw = SessionEnvelope::peek_raw(&bytes).map_err(|e| SessionStoreError::Envelope(id, e))?;
        let version = raw
            .get("version")
            .and_then(|v| v.as_str())
            .ok_or(SessionStoreError::MissingVersion(id))?
            .to_string();

        if version == CURRENT_SCHEMA_VERSION {
            let envelope = SessionEnvelope::from_bytes(&bytes).map_err(|e| SessionStoreError::Envelope(id, e))?;
            envelope
                .verify_checksum()
                .map_err(|e| SessionStoreError::Envelope(id, e))?;
            return Ok(Some((envelope.data, None)));
        }

        tracing::info!(session_id = %id, from_version = %version, "session schema predates current version, migrating");
        let data = raw
            .get("data")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let (migrated_data, result) = migration::migrate(data, &version, |value| self.write_backup(id, &version, value))
            .map_err(|e| SessionStoreError::Migration(id, e))?;

        let session: Session =
            serde_json::from_value(migrated_data).map_err(|e| SessionStoreError::MigratedDataInvalid(id, e))?;
        self.update_session(&session).await?;
        tracing::info!(
            session_id = %id,
            from_version = %version,
            to_version = %result.final_version,
            backup = ?result.backup_path,
            "session migration complete"
        );
        Ok(Some((session, Some(result))))
    }

    /// Runs the startup integrity check: validates the index against the
    /// files on disk and, if issues are found, removes orphaned entries.
    pub async fn run_integrity_check(&self) -> Result<ValidationReport, SessionStoreError> {
        let present = self.present_session_ids().await?;
        let mut index = self.index.lock().await;
        let report = index::validate(&index, &present);
        if !report.orphaned_entries.is_empty() {
            index::cleanup_orphaned_entries(&mut index, &report);
            self.write_index(&index).await?;
        }
        Ok(report)
    }
}

fn sessions_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("sessions")
}

fn backups_dir(data_dir: &Path) -> PathBuf {
    sessions_dir(data_dir).join("backups")
}

/// Writes `bytes` to `path` via temp-file + fsync + rename, so a process
/// killed mid-write leaves either the pre-image or the new image, never a
/// partial file.
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp_path = dir.to_path_buf();
    tmp_path.push(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("session"),
        Uuid::new_v4()
    ));

    {
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        use tokio::io::AsyncWriteExt;
        file.write_all(bytes).await?;
        file.sync_all().await?;
    }
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create_session(&self, session: Session) -> Result<(), SessionStoreError> {
        let lock = self.locks.lock_for(session.id);
        let _guard = lock.lock().await;

        let path = self.session_path(session.id);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SessionStoreError::Io(session.id, e))?
        {
            return Err(SessionStoreError::AlreadyExists(session.id));
        }

        let envelope = SessionEnvelope::new(session.clone());
        let bytes = envelope
            .to_bytes()
            .map_err(|e| SessionStoreError::Envelope(session.id, e))?;
        atomic_write(&path, &bytes)
            .await
            .map_err(|e| SessionStoreError::Io(session.id, e))?;

        let mut index = self.index.lock().await;
        index.insert(SessionMetadata::from(&session));
        self.write_index(&index).await?;

        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.get_session_with_migration(id).await?.map(|(session, _)| session))
    }

    async fn update_session(&self, session: &Session) -> Result<(), SessionStoreError> {
        let lock = self.locks.lock_for(session.id);
        let _guard = lock.lock().await;

        let path = self.session_path(session.id);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SessionStoreError::Io(session.id, e))?
        {
            return Err(SessionStoreError::NotFound(session.id));
        }

        let envelope = SessionEnvelope::new(session.clone());
        let bytes = envelope
            .to_bytes()
            .map_err(|e| SessionStoreError::Envelope(session.id, e))?;
        atomic_write(&path, &bytes)
            .await
            .map_err(|e| SessionStoreError::Io(session.id, e))?;

        let mut index = self.index.lock().await;
        index.insert(SessionMetadata::from(session));
        self.write_index(&index).await?;

        Ok(())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), SessionStoreError> {
        let lock = self.locks.lock_for(id);
        let _guard = lock.lock().await;

        let path = self.session_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionStoreError::NotFound(id));
            }
            Err(e) => return Err(SessionStoreError::Io(id, e)),
        }

        let mut index = self.index.lock().await;
        index.remove(&id);
        self.write_index(&index).await?;
        Ok(())
    }

    async fn list_metadata(&self) -> Result<Vec<SessionMetadata>, SessionStoreError> {
        let index = self.index.lock().await;
        Ok(index.entries.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let session = Session::new("openai", "gpt-test", "/repo");
        let id = session.id;
        store.create_session(session).await.unwrap();

        let fetched = store.get_session(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn creating_duplicate_session_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let session = Session::new("openai", "gpt-test", "/repo");
        store.create_session(session.clone()).await.unwrap();
        let result = store.create_session(session).await;
        assert!(matches!(result, Err(SessionStoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn update_nonexistent_session_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let session = Session::new("openai", "gpt-test", "/repo");
        let result = store.update_session(&session).await;
        assert!(matches!(result, Err(SessionStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_removes_session_and_index_entry() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let session = Session::new("openai", "gpt-test", "/repo");
        let id = session.id;
        store.create_session(session).await.unwrap();
        store.delete_session(id).await.unwrap();

        assert!(store.get_session(id).await.unwrap().is_none());
        assert!(store.list_metadata().await.unwrap().is_empty());
    }

    fn write_raw_envelope(path: &Path, envelope: &serde_json::Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec_pretty(envelope).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn reading_an_old_schema_session_migrates_it_and_writes_a_backup() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let id = Uuid::new_v4();

        let legacy_data = serde_json::json!({
            "id": id,
            "version": "0.7.0",
            "created": "2024-01-01T00:00:00Z",
            "last_modified": "2024-01-01T00:00:00Z",
            "model": "gpt-test",
            "provider": "openai",
            "messages": [],
        });
        let legacy_envelope = serde_json::json!({
            "version": "0.7.0",
            "compressed": false,
            "checksum": null,
            "data": legacy_data,
        });
        write_raw_envelope(&store.session_path(id), &legacy_envelope);

        let (session, result) = store.get_session_with_migration(id).await.unwrap().unwrap();
        assert_eq!(session.version, "1.0.0");
        assert_eq!(session.workspace_root, "/");
        let result = result.expect("a migration should have run");
        assert_eq!(result.final_version, "1.0.0");
        let backup_path = result.backup_path.expect("backup path recorded");
        assert!(Path::new(&backup_path).exists());

        // Re-reading now sees the already-migrated, rewritten file: no
        // further migration, and the index was kept in sync by `update_session`.
        let (_, second_result) = store.get_session_with_migration(id).await.unwrap().unwrap();
        assert!(second_result.is_none());
    }

    #[tokio::test]
    async fn session_envelope_missing_version_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let id = Uuid::new_v4();
        write_raw_envelope(&store.session_path(id), &serde_json::json!({"data": {}}));

        let result = store.get_session_with_migration(id).await;
        assert!(matches!(result, Err(SessionStoreError::MissingVersion(_))));
    }

    #[tokio::test]
    async fn integrity_check_removes_orphaned_index_entries() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::open(dir.path()).await.unwrap();
        let session = Session::new("openai", "gpt-test", "/repo");
        let id = session.id;
        store.create_session(session).await.unwrap();

        tokio::fs::remove_file(store.session_path(id)).await.unwrap();

        let report = store.run_integrity_check().await.unwrap();
        assert_eq!(report.orphaned_entries, vec![id]);
        assert!(store.list_metadata().await.unwrap().is_empty());
    }
}

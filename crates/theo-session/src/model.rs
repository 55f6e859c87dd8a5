//! The durable conversation record itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use theo_core::Message;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub total: u32,
    pub input: u32,
    pub output: u32,
}

impl TokenCount {
    pub fn is_consistent(&self) -> bool {
        self.total >= self.input + self.output
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub version: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    #[serde(default)]
    pub token_count: TokenCount,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context_files: Vec<String>,
    #[serde(default)]
    pub files_accessed: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_workspace_root() -> String {
    "/".to_string()
}

impl Session {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, workspace_root: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            version: CURRENT_SCHEMA_VERSION.to_string(),
            created: now,
            last_modified: now,
            model: model.into(),
            provider: provider.into(),
            workspace_root: workspace_root.into(),
            token_count: TokenCount::default(),
            messages: Vec::new(),
            context_files: Vec::new(),
            files_accessed: Vec::new(),
            tags: Vec::new(),
            title: None,
            notes: None,
        }
    }

    pub fn validate(&self) -> Result<(), SessionValidationError> {
        if self.last_modified < self.created {
            return Err(SessionValidationError::LastModifiedBeforeCreated);
        }
        if !self.token_count.is_consistent() {
            return Err(SessionValidationError::InconsistentTokenCount);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionValidationError {
    #[error("lastModified predates created")]
    LastModifiedBeforeCreated,
    #[error("tokenCount.total is less than input + output")]
    InconsistentTokenCount,
}

/// The most recent schema version this crate writes by default.
pub const CURRENT_SCHEMA_VERSION: &str = "1.0.0";

/// Lightweight summary stored in the index, avoiding a full session read for
/// listing/search UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: Uuid,
    pub provider: String,
    pub model: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub title: Option<String>,
    pub message_count: usize,
}

impl From<&Session> for SessionMetadata {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            provider: session.provider.clone(),
            model: session.model.clone(),
            created: session.created,
            last_modified: session.last_modified,
            title: session.title.clone(),
            message_count: session.messages.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_valid() {
        let session = Session::new("openai", "gpt-test", "/repo");
        assert!(session.validate().is_ok());
    }

    #[test]
    fn inconsistent_token_count_is_rejected() {
        let mut session = Session::new("openai", "gpt-test", "/repo");
        session.token_count = TokenCount {
            total: 5,
            input: 10,
            output: 10,
        };
        assert_eq!(
            session.validate(),
            Err(SessionValidationError::InconsistentTokenCount)
        );
    }

    #[test]
    fn last_modified_before_created_is_rejected() {
        let mut session = Session::new("openai", "gpt-test", "/repo");
        session.last_modified = session.created - chrono::Duration::seconds(1);
        assert_eq!(
            session.validate(),
            Err(SessionValidationError::LastModifiedBeforeCreated)
        );
    }
}

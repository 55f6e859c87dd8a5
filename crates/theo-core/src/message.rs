//! Provider-independent conversation message model.
//!
//! Mirrors the wire-agnostic shape every adapter translates to and from: a
//! message is either plain text or an ordered sequence of content blocks,
//! never both at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolCall;

/// Who sent a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single block within a block-structured message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { mime_type: String, data: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
}

/// A message's body: either a plain string or an ordered list of blocks.
///
/// The two variants are kept mutually exclusive by construction so a message
/// can never carry both a text body and a block body at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(t) => Some(t),
            Content::Blocks(_) => None,
        }
    }

    /// Flattens block content to a plain string, concatenating text blocks.
    /// Used by adapters that only accept a string body (e.g. Ollama prompts).
    pub fn flatten_to_text(&self) -> String {
        match self {
            Content::Text(t) => t.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultRef>>,
}

/// Reference from a `role=tool` message back to the tool call it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRef {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Errors raised when a `Message` violates the data-model invariants.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("role=tool message must carry toolResults referencing prior toolCalls")]
    ToolMessageMissingResults,
    #[error("tool result references unknown tool_call_id: {0}")]
    DanglingToolResult(String),
}

impl Message {
    pub fn new(role: Role, content: Content) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            tool_calls: None,
            tool_results: None,
        }
    }

    /// Validates the role=tool invariant against a set of known prior tool-call ids.
    pub fn validate_tool_message(&self, known_call_ids: &[String]) -> Result<(), MessageError> {
        if self.role != Role::Tool {
            return Ok(());
        }
        let results = self
            .tool_results
            .as_ref()
            .ok_or(MessageError::ToolMessageMissingResults)?;
        if results.is_empty() {
            return Err(MessageError::ToolMessageMissingResults);
        }
        for r in results {
            if !known_call_ids.iter().any(|id| id == &r.tool_call_id) {
                return Err(MessageError::DanglingToolResult(r.tool_call_id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_blocks_are_mutually_exclusive_by_construction() {
        let text = Content::Text("hello".into());
        assert!(text.as_text().is_some());

        let blocks = Content::Blocks(vec![ContentBlock::Text { text: "hi".into() }]);
        assert!(blocks.as_text().is_none());
    }

    #[test]
    fn flatten_joins_text_blocks_only() {
        let blocks = Content::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::ToolUse {
                id: "1".into(),
                name: "foo".into(),
                input: serde_json::json!({}),
            },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(blocks.flatten_to_text(), "a\nb");
    }

    #[test]
    fn tool_message_without_results_is_rejected() {
        let msg = Message::new(Role::Tool, Content::Text("".into()));
        assert_eq!(
            msg.validate_tool_message(&[]),
            Err(MessageError::ToolMessageMissingResults)
        );
    }

    #[test]
    fn tool_message_referencing_unknown_call_is_rejected() {
        let mut msg = Message::new(Role::Tool, Content::Text("".into()));
        msg.tool_results = Some(vec![ToolResultRef {
            tool_call_id: "missing".into(),
            content: "ok".into(),
            is_error: false,
        }]);
        assert_eq!(
            msg.validate_tool_message(&["known".to_string()]),
            Err(MessageError::DanglingToolResult("missing".into()))
        );
    }

    #[test]
    fn tool_message_referencing_known_call_is_accepted() {
        let mut msg = Message::new(Role::Tool, Content::Text("".into()));
        msg.tool_results = Some(vec![ToolResultRef {
            tool_call_id: "known".into(),
            content: "ok".into(),
            is_error: false,
        }]);
        assert!(msg.validate_tool_message(&["known".to_string()]).is_ok());
    }
}

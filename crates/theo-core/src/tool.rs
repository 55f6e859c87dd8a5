//! Universal tool definitions and calls.
//!
//! `UniversalToolDefinition` is the provider-independent shape; each adapter
//! converts it to its vendor's tool schema (Anthropic `input_schema`, OpenAI
//! `function`, Ollama system-prompt preamble) and back. `name`, `description`
//! and `parameters.properties` must survive the round trip, and a missing
//! `required` normalizes to `[]`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// JSON-Schema-shaped parameters for a tool, restricted to the subset the
/// spec requires: an object schema with `properties` and optional `required`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type", default = "default_object_type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

fn default_object_type() -> String {
    "object".to_string()
}

/// Errors constructing a `UniversalToolDefinition`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ToolDefinitionError {
    #[error("tool name {0:?} does not match ^[A-Za-z_][A-Za-z0-9_]*$")]
    InvalidName(String),
    #[error("tool description must be non-empty")]
    EmptyDescription,
}

/// A provider-independent tool definition, as presented to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

impl UniversalToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
    ) -> Result<Self, ToolDefinitionError> {
        let name = name.into();
        let description = description.into();
        if !NAME_RE.is_match(&name) {
            return Err(ToolDefinitionError::InvalidName(name));
        }
        if description.trim().is_empty() {
            return Err(ToolDefinitionError::EmptyDescription);
        }
        Ok(Self {
            name,
            description,
            parameters,
        })
    }
}

/// A tool call the model wants to make, assembled by a streaming decoder or
/// returned from a non-streaming response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments serialized as a JSON string (never a parsed `Value`), matching
    /// the wire shape every provider actually emits for tool-call deltas.
    pub arguments: String,
}

impl ToolCall {
    /// `arguments` must always be valid JSON per the decoder invariant;
    /// malformed arguments should be dropped upstream rather than constructed here.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ToolParameters {
        ToolParameters {
            schema_type: "object".into(),
            properties: HashMap::from([(
                "path".to_string(),
                serde_json::json!({"type": "string"}),
            )]),
            required: vec![],
        }
    }

    #[test]
    fn valid_name_is_accepted() {
        assert!(UniversalToolDefinition::new("read_file", "reads a file", params()).is_ok());
    }

    #[test]
    fn name_with_leading_digit_is_rejected() {
        assert_eq!(
            UniversalToolDefinition::new("1read", "x", params()),
            Err(ToolDefinitionError::InvalidName("1read".into()))
        );
    }

    #[test]
    fn empty_description_is_rejected() {
        assert_eq!(
            UniversalToolDefinition::new("read_file", "  ", params()),
            Err(ToolDefinitionError::EmptyDescription)
        );
    }

    #[test]
    fn missing_required_defaults_to_empty_vec() {
        let json = r#"{"type":"object","properties":{}}"#;
        let parsed: ToolParameters = serde_json::from_str(json).unwrap();
        assert!(parsed.required.is_empty());
    }

    #[test]
    fn parsed_arguments_roundtrips_json_string() {
        let call = ToolCall {
            id: "1".into(),
            name: "foo".into(),
            arguments: r#"{"a":1}"#.into(),
        };
        assert_eq!(call.parsed_arguments().unwrap(), serde_json::json!({"a": 1}));
    }
}

//! Anthropic Messages API wire format: request/response shapes and the
//! translation to/from the universal `Message`/`UniversalToolDefinition`.
//!
//! Unlike the OpenAI-family chat-completions shape, Anthropic takes `system`
//! as a top-level field rather than a message with `role=system`, and every
//! message body is an ordered list of content blocks rather than a plain
//! string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use theo_core::{Content, ContentBlock, Message, Role, UniversalToolDefinition};

#[derive(Serialize, Debug)]
pub struct MessagesRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
}

#[derive(Serialize, Debug)]
pub struct AnthropicTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Serialize, Debug)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicBlock>,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
}

/// Translates the universal message history into Anthropic's role/content
/// shape, extracting any `role=system` message out into the top-level
/// `system` field since Anthropic does not accept system as a message role.
pub fn to_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system = None;
    let mut out = Vec::new();
    for m in messages {
        if m.role == Role::System {
            let text = m.content.flatten_to_text();
            system = Some(match system {
                Some(existing) => format!("{existing}\n{text}"),
                None => text,
            });
            continue;
        }

        let role = match m.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "user",
            Role::System => unreachable!(),
        };

        let mut blocks = Vec::new();
        if m.role == Role::Tool {
            if let Some(results) = &m.tool_results {
                for r in results {
                    blocks.push(AnthropicBlock::ToolResult {
                        tool_use_id: r.tool_call_id.clone(),
                        content: r.content.clone(),
                        is_error: r.is_error,
                    });
                }
            }
        } else {
            match &m.content {
                Content::Text(t) if !t.is_empty() => blocks.push(AnthropicBlock::Text { text: t.clone() }),
                Content::Text(_) => {}
                Content::Blocks(bs) => {
                    for b in bs {
                        if let ContentBlock::Text { text } = b {
                            blocks.push(AnthropicBlock::Text { text: text.clone() });
                        }
                    }
                }
            }
            if let Some(calls) = &m.tool_calls {
                for c in calls {
                    let input = c.parsed_arguments().unwrap_or(Value::Object(Default::default()));
                    blocks.push(AnthropicBlock::ToolUse {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        input,
                    });
                }
            }
        }

        if !blocks.is_empty() {
            out.push(AnthropicMessage { role, content: blocks });
        }
    }
    (system, out)
}

/// Translates universal tool definitions into Anthropic's `input_schema`
/// shape. Round trip (universal -> `AnthropicTool` -> universal) preserves
/// name, description and parameters.properties.
pub fn to_tools(tools: &[UniversalToolDefinition]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: serde_json::json!({
                "type": t.parameters.schema_type,
                "properties": t.parameters.properties,
                "required": t.parameters.required,
            }),
        })
        .collect()
}

/// A single `data: {...}` SSE event from the Messages streaming endpoint.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStartBody },
    #[serde(rename = "content_block_start")]
    ContentBlockStart { index: usize, content_block: ContentBlockStart },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: BlockDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: usize },
    #[serde(rename = "message_delta")]
    MessageDelta { delta: MessageDeltaBody, usage: Option<UsageWire> },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "error")]
    Error { error: ErrorBody },
}

#[derive(Deserialize, Debug)]
pub struct MessageStartBody {
    #[serde(default)]
    pub usage: Option<UsageWire>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockStart {
    Text { text: String },
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Default)]
pub struct BlockDelta {
    #[serde(rename = "type")]
    pub delta_type: Option<String>,
    pub text: Option<String>,
    pub partial_json: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct MessageDeltaBody {
    pub stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UsageWire {
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

#[derive(Deserialize, Debug)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use theo_core::ToolParameters;

    #[test]
    fn system_message_is_extracted_to_top_level_field() {
        let messages = vec![
            Message::new(Role::System, Content::Text("be nice".into())),
            Message::new(Role::User, Content::Text("hi".into())),
        ];
        let (system, converted) = to_messages(&messages);
        assert_eq!(system, Some("be nice".to_string()));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
    }

    #[test]
    fn tool_round_trip_preserves_name_description_and_properties() {
        let params = ToolParameters {
            schema_type: "object".into(),
            properties: HashMap::from([("path".to_string(), serde_json::json!({"type": "string"}))]),
            required: vec![],
        };
        let def = UniversalToolDefinition::new("read_file", "reads a file", params).unwrap();
        let tools = to_tools(std::slice::from_ref(&def));
        assert_eq!(tools[0].name, def.name);
        assert_eq!(tools[0].description, def.description);
        assert_eq!(tools[0].input_schema["required"], serde_json::json!([]));
    }
}

//! OpenAI chat-completions wire format: request/response shapes and the
//! translation to/from the universal `Message`/`UniversalToolDefinition`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use theo_core::{Content, ContentBlock, Message, Role, UniversalToolDefinition};

#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
}

#[derive(Serialize, Debug)]
pub struct ChatMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ToolCallOut {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: &'static str,
    pub function: FunctionCallOut,
}

#[derive(Serialize, Debug)]
pub struct FunctionCallOut {
    pub name: String,
    pub arguments: String,
}

#[derive(Serialize, Debug)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub spec_type: &'static str,
    pub function: FunctionSpec,
}

#[derive(Serialize, Debug)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Translates the universal role/content model into OpenAI's flat
/// string-content chat message, flattening block content to text since the
/// plain chat-completions endpoint only accepts string bodies for
/// non-vision messages.
pub fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let tool_call_id = m
                .tool_results
                .as_ref()
                .and_then(|r| r.first())
                .map(|r| r.tool_call_id.clone());
            let content = if m.role == Role::Tool {
                m.tool_results
                    .as_ref()
                    .and_then(|r| r.first())
                    .map(|r| r.content.clone())
            } else {
                Some(flatten(&m.content))
            };
            let tool_calls = m.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|c| ToolCallOut {
                        id: c.id.clone(),
                        call_type: "function",
                        function: FunctionCallOut {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect()
            });
            ChatMessage {
                role,
                content,
                tool_calls,
                tool_call_id,
            }
        })
        .collect()
}

fn flatten(content: &Content) -> String {
    match content {
        Content::Text(t) => t.clone(),
        Content::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Translates universal tool definitions into OpenAI's `function` spec
/// shape. The round trip (universal -> `ToolSpec` -> universal) must
/// preserve name, description and parameters.properties.
pub fn to_tool_specs(tools: &[UniversalToolDefinition]) -> Vec<ToolSpec> {
    tools
        .iter()
        .map(|t| ToolSpec {
            spec_type: "function",
            function: FunctionSpec {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: serde_json::json!({
                    "type": t.parameters.schema_type,
                    "properties": t.parameters.properties,
                    "required": t.parameters.required,
                }),
            },
        })
        .collect()
}

/// Non-streaming chat completion response, used by `validate_config`-style
/// smoke calls and by providers (e.g. OpenRouter) that disable streaming.
#[derive(Deserialize, Debug)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
    pub usage: Option<UsageWire>,
}

#[derive(Deserialize, Debug)]
pub struct Choice {
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UsageWire {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A single `data: {...}` SSE event body from the streaming endpoint.
#[derive(Deserialize, Debug)]
pub struct StreamEvent {
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<UsageWire>,
}

#[derive(Deserialize, Debug)]
pub struct StreamChoice {
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Delta {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize, Debug)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub function: FunctionDelta,
}

#[derive(Deserialize, Debug, Default)]
pub struct FunctionDelta {
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use theo_core::ToolParameters;
    use std::collections::HashMap;

    #[test]
    fn flattens_block_content_to_joined_text() {
        let content = Content::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(flatten(&content), "a\nb");
    }

    #[test]
    fn tool_spec_round_trip_preserves_name_description_and_properties() {
        let params = ToolParameters {
            schema_type: "object".into(),
            properties: HashMap::from([("path".to_string(), serde_json::json!({"type": "string"}))]),
            required: vec![],
        };
        let def = UniversalToolDefinition::new("read_file", "reads a file", params).unwrap();
        let specs = to_tool_specs(std::slice::from_ref(&def));
        assert_eq!(specs[0].function.name, def.name);
        assert_eq!(specs[0].function.description, def.description);
        assert_eq!(specs[0].function.parameters["properties"], serde_json::json!({"path": {"type": "string"}}));
        assert_eq!(specs[0].function.parameters["required"], serde_json::json!([]));
    }
}

//! Gemini `generateContent`/`streamGenerateContent` wire format.
//!
//! Google uses `"model"` rather than `"assistant"` for the model's own turn,
//! and carries the system prompt in a top-level `systemInstruction` field
//! rather than as a message with a system role.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use theo_core::{Content, ContentBlock, Message, Role, UniversalToolDefinition};

#[derive(Serialize, Debug)]
pub struct GenerateRequest {
    pub contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
    pub system_instruction: Option<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "generationConfig")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<GoogleTool>>,
}

#[derive(Serialize, Debug)]
pub struct GoogleContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub parts: Vec<GooglePart>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum GooglePart {
    Text { text: String },
    FunctionCall { #[serde(rename = "functionCall")] function_call: GoogleFunctionCall },
    FunctionResponse { #[serde(rename = "functionResponse")] function_response: GoogleFunctionResponse },
}

#[derive(Serialize, Debug)]
pub struct GoogleFunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Serialize, Debug)]
pub struct GoogleFunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Serialize, Debug)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "topP")]
    pub top_p: Option<f32>,
}

#[derive(Serialize, Debug)]
pub struct GoogleTool {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize, Debug)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Translates the universal history into Gemini's `contents` array, pulling
/// any `role=system` message out into `systemInstruction`.
pub fn to_contents(messages: &[Message]) -> (Option<GoogleContent>, Vec<GoogleContent>) {
    let mut system = None;
    let mut out = Vec::new();
    for m in messages {
        if m.role == Role::System {
            let text = m.content.flatten_to_text();
            system = Some(GoogleContent { role: None, parts: vec![GooglePart::Text { text }] });
            continue;
        }

        let role = match m.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "model",
            Role::System => unreachable!(),
        };

        let mut parts = Vec::new();
        if m.role == Role::Tool {
            if let Some(results) = &m.tool_results {
                for r in results {
                    parts.push(GooglePart::FunctionResponse {
                        function_response: GoogleFunctionResponse {
                            name: r.tool_call_id.clone(),
                            response: serde_json::json!({ "content": r.content }),
                        },
                    });
                }
            }
        } else {
            match &m.content {
                Content::Text(t) if !t.is_empty() => parts.push(GooglePart::Text { text: t.clone() }),
                Content::Text(_) => {}
                Content::Blocks(bs) => {
                    for b in bs {
                        if let ContentBlock::Text { text } = b {
                            parts.push(GooglePart::Text { text: text.clone() });
                        }
                    }
                }
            }
            if let Some(calls) = &m.tool_calls {
                for c in calls {
                    let args = c.parsed_arguments().unwrap_or(Value::Object(Default::default()));
                    parts.push(GooglePart::FunctionCall {
                        function_call: GoogleFunctionCall { name: c.name.clone(), args },
                    });
                }
            }
        }

        if !parts.is_empty() {
            out.push(GoogleContent { role: Some(role), parts });
        }
    }
    (system, out)
}

pub fn to_tools(tools: &[UniversalToolDefinition]) -> Vec<GoogleTool> {
    vec![GoogleTool {
        function_declarations: tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: serde_json::json!({
                    "type": t.parameters.schema_type,
                    "properties": t.parameters.properties,
                    "required": t.parameters.required,
                }),
            })
            .collect(),
    }]
}

/// A single `data: {...}` SSE event from `streamGenerateContent?alt=sse`:
/// each event carries an incremental text delta in `candidates[0].content.
/// parts[].text`, emitted by the decoder as-is (no accumulation or
/// diffing against prior events).
#[derive(Deserialize, Debug)]
pub struct StreamResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize, Debug)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<ResponseContent>,
    #[serde(rename = "finishReason", default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ResponseContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "functionCall", default)]
    pub function_call: Option<GoogleFunctionCallWire>,
}

#[derive(Deserialize, Debug)]
pub struct GoogleFunctionCallWire {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Deserialize, Debug)]
pub struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    pub prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    pub candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use theo_core::ToolParameters;

    #[test]
    fn system_message_becomes_system_instruction() {
        let messages = vec![
            Message::new(Role::System, Content::Text("be nice".into())),
            Message::new(Role::User, Content::Text("hi".into())),
        ];
        let (system, contents) = to_contents(&messages);
        assert!(system.is_some());
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role, Some("user"));
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let messages = vec![Message::new(Role::Assistant, Content::Text("hi".into()))];
        let (_, contents) = to_contents(&messages);
        assert_eq!(contents[0].role, Some("model"));
    }

    #[test]
    fn tool_declarations_preserve_name_description_and_properties() {
        let params = ToolParameters {
            schema_type: "object".into(),
            properties: HashMap::from([("path".to_string(), serde_json::json!({"type": "string"}))]),
            required: vec![],
        };
        let def = UniversalToolDefinition::new("read_file", "reads a file", params).unwrap();
        let tools = to_tools(std::slice::from_ref(&def));
        let decl = &tools[0].function_declarations[0];
        assert_eq!(decl.name, def.name);
        assert_eq!(decl.description, def.description);
        assert_eq!(decl.parameters["required"], serde_json::json!([]));
    }
}

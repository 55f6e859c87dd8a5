//! Ollama `/api/chat` NDJSON request/response shapes.
//!
//! Tool definitions are not sent as a native `tools` field: per the
//! system-prompt-preamble convention this adapter uses, they are rendered
//! into a system message appended ahead of the caller's own messages, and
//! the model's replies are scanned for a `Tool call: name({...})` line
//! rather than parsed from a `tool_calls` field.

use serde::{Deserialize, Serialize};
use theo_core::{Message, Role, UniversalToolDefinition};

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

const TOOL_PREAMBLE_HEADER: &str = "You have access to the following tools. To call one, reply with a line of the exact form:\nTool call: name({\"arg\": \"value\"})\nOnly emit a tool call line when you intend to invoke the tool; otherwise respond normally.\n\nAvailable tools:";

/// Renders tool definitions into the system-prompt preamble text. Returns
/// `None` when there are no tools to announce.
pub fn render_tool_preamble(tools: &[UniversalToolDefinition]) -> Option<String> {
    if tools.is_empty() {
        return None;
    }
    let mut out = String::from(TOOL_PREAMBLE_HEADER);
    for tool in tools {
        out.push_str(&format!(
            "\n- {}: {} (parameters: {})",
            tool.name,
            tool.description,
            serde_json::to_string(&tool.parameters).unwrap_or_else(|_| "{}".to_string())
        ));
    }
    Some(out)
}

/// Flattens universal messages into Ollama chat messages, prepending a
/// synthesized system message carrying the tool preamble (merged into any
/// existing system message rather than sent as a second one).
pub fn to_chat_messages(messages: &[Message], tool_preamble: Option<&str>) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    let mut preamble_merged = false;

    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "user",
        };
        let mut text = message.content.flatten_to_text();
        if message.role == Role::System {
            if let Some(preamble) = tool_preamble {
                text = format!("{text}\n\n{preamble}");
                preamble_merged = true;
            }
        }
        out.push(ChatMessage { role, content: text });
    }

    if !preamble_merged {
        if let Some(preamble) = tool_preamble {
            out.insert(0, ChatMessage { role: "system", content: preamble.to_string() });
        }
    }

    out
}

#[derive(Debug, Deserialize)]
pub struct StreamResponse {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    #[serde(default)]
    pub eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: String,
}

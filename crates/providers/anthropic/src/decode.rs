//! Incremental SSE decoder for the Anthropic Messages streaming endpoint.
//!
//! Anthropic keys content blocks (text or tool_use) by `index` and streams
//! `input_json_delta` fragments for tool calls; the decoder accumulates
//! arguments per index and emits a single `StreamChunk::ToolCall` once the
//! block's `content_block_stop` event arrives.

use std::collections::HashMap;

use theo_core::{ErrorCode, GatewayError, StreamChunk, Usage};

use crate::wire::{ContentBlockStart, StreamEvent};

#[derive(Default, Debug)]
struct ToolCallState {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Default)]
pub struct AnthropicStreamDecoder {
    provider: String,
    line_buffer: String,
    tool_states: HashMap<usize, ToolCallState>,
    input_tokens: u32,
    output_tokens: u32,
    done: bool,
}

impl AnthropicStreamDecoder {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        if self.done {
            return Vec::new();
        }
        self.line_buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut out = Vec::new();

        while let Some(pos) = self.line_buffer.find('\n') {
            let line = self.line_buffer[..pos].trim_end_matches('\r').to_string();
            self.line_buffer.drain(..=pos);
            if self.done {
                break;
            }
            self.process_line(&line, &mut out);
        }
        out
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<StreamChunk>) {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data: ") else {
            return;
        };
        if data.is_empty() {
            return;
        }

        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(e) => e,
            Err(e) => {
                out.push(StreamChunk::Error {
                    code: ErrorCode::ApiError,
                    message: format!("malformed Anthropic stream event: {e}"),
                });
                self.done = true;
                return;
            }
        };

        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.input_tokens = usage.input_tokens;
                }
            }
            StreamEvent::ContentBlockStart { index, content_block } => {
                if let ContentBlockStart::ToolUse { id, name } = content_block {
                    self.tool_states.insert(index, ToolCallState { id, name, arguments: String::new() });
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                if let Some(text) = delta.text {
                    if !text.is_empty() {
                        out.push(StreamChunk::Text { text });
                    }
                } else if let Some(partial) = delta.partial_json {
                    if let Some(state) = self.tool_states.get_mut(&index) {
                        state.arguments.push_str(&partial);
                    }
                }
            }
            StreamEvent::ContentBlockStop { index } => {
                if let Some(state) = self.tool_states.remove(&index) {
                    emit_tool_call(&self.provider, state, out);
                }
            }
            StreamEvent::MessageDelta { delta: _, usage } => {
                if let Some(usage) = usage {
                    self.output_tokens = usage.output_tokens;
                }
            }
            StreamEvent::MessageStop => {
                self.finish(out);
            }
            StreamEvent::Ping => {}
            StreamEvent::Error { error } => {
                out.push(StreamChunk::Error {
                    code: map_error_type(&error.error_type),
                    message: error.message,
                });
                self.done = true;
            }
        }
    }

    fn finish(&mut self, out: &mut Vec<StreamChunk>) {
        for (_, state) in self.tool_states.drain() {
            emit_tool_call(&self.provider, state, out);
        }
        out.push(StreamChunk::Done {
            usage: Some(Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            }),
        });
        self.done = true;
    }
}

fn emit_tool_call(provider: &str, state: ToolCallState, out: &mut Vec<StreamChunk>) {
    if state.name.is_empty() {
        tracing::warn!(provider, "dropping tool call with empty name");
        return;
    }
    if state.arguments.trim().is_empty() {
        out.push(StreamChunk::ToolCall { id: state.id, name: state.name, arguments: "{}".to_string() });
        return;
    }
    if serde_json::from_str::<serde_json::Value>(&state.arguments).is_err() {
        tracing::warn!(provider, "dropping tool call with non-JSON arguments");
        return;
    }
    out.push(StreamChunk::ToolCall { id: state.id, name: state.name, arguments: state.arguments });
}

fn map_error_type(error_type: &str) -> ErrorCode {
    match error_type {
        "authentication_error" | "permission_error" => ErrorCode::AuthFailed,
        "rate_limit_error" => ErrorCode::RateLimited,
        "invalid_request_error" => ErrorCode::InvalidRequest,
        "overloaded_error" => ErrorCode::NetworkError,
        _ => ErrorCode::ApiError,
    }
}

/// Maps an HTTP status/body pair from the Messages endpoint onto the
/// canonical error taxonomy.
pub fn map_http_error(provider: &str, status: u16, body: &str) -> GatewayError {
    let code = match status {
        401 | 403 => ErrorCode::AuthFailed,
        402 => ErrorCode::InsufficientCredits,
        408 => ErrorCode::Timeout,
        429 => ErrorCode::RateLimited,
        400 if body.contains("prompt is too long") || body.contains("context_length") => {
            ErrorCode::ContextLengthExceeded
        }
        400 | 422 => ErrorCode::InvalidRequest,
        529 => ErrorCode::NetworkError,
        _ => ErrorCode::ApiError,
    };
    GatewayError::new(code, provider, format!("HTTP {status}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse(events: &[&str]) -> Vec<u8> {
        events.iter().map(|e| format!("data: {e}\n\n")).collect::<String>().into_bytes()
    }

    #[test]
    fn decodes_text_deltas_then_done() {
        let mut decoder = AnthropicStreamDecoder::new("anthropic");
        let input = sse(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":5}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":5,"output_tokens":2}}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        let out = decoder.feed(&input);
        assert!(matches!(&out[0], StreamChunk::Text { text } if text == "Hi"));
        match out.last().unwrap() {
            StreamChunk::Done { usage: Some(u) } => {
                assert_eq!(u.input_tokens, 5);
                assert_eq!(u.output_tokens, 2);
            }
            other => panic!("expected Done with usage, got {other:?}"),
        }
    }

    #[test]
    fn accumulates_tool_input_json_across_deltas() {
        let mut decoder = AnthropicStreamDecoder::new("anthropic");
        let input = sse(&[
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"read_file"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"path\""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":":\"a.rs\"}"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_stop"}"#,
        ]);
        let out = decoder.feed(&input);
        let calls: Vec<_> = out.iter().filter(|c| matches!(c, StreamChunk::ToolCall { .. })).collect();
        assert_eq!(calls.len(), 1);
        if let StreamChunk::ToolCall { id, name, arguments } = calls[0] {
            assert_eq!(id, "toolu_1");
            assert_eq!(name, "read_file");
            assert_eq!(arguments, r#"{"path":"a.rs"}"#);
        }
    }

    #[test]
    fn error_event_maps_to_canonical_code_and_terminates() {
        let mut decoder = AnthropicStreamDecoder::new("anthropic");
        let input = sse(&[r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#]);
        let out = decoder.feed(&input);
        assert!(matches!(out[0], StreamChunk::Error { code: ErrorCode::RateLimited, .. }));
    }

    #[test]
    fn status_codes_map_to_canonical_error_codes() {
        assert_eq!(map_http_error("anthropic", 429, "").code, ErrorCode::RateLimited);
        assert_eq!(map_http_error("anthropic", 401, "").code, ErrorCode::AuthFailed);
    }
}

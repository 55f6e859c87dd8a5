//! Incremental SSE decoder for the OpenAI chat-completions stream.
//!
//! Accumulates tool-call deltas by index as they stream in. Instead of
//! emitting `ToolUseStart`/`ToolUseInputDelta` chunks as they arrive, it
//! buffers per-index state internally and emits a single
//! `StreamChunk::ToolCall` once a call completes, per the narrower
//! `theo_core::StreamChunk` shape.

use std::collections::HashMap;

use theo_core::{ErrorCode, GatewayError, StreamChunk, Usage};

use crate::wire::StreamEvent;

#[derive(Default, Debug)]
struct ToolCallState {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates SSE `data:` lines across chunk boundaries and decodes
/// complete lines into `StreamChunk`s, never emitting more than one
/// terminal chunk.
#[derive(Default)]
pub struct OpenAiStreamDecoder {
    provider: String,
    line_buffer: String,
    tool_states: HashMap<usize, ToolCallState>,
    done: bool,
}

impl OpenAiStreamDecoder {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Default::default()
        }
    }

    /// Feeds a raw byte chunk from the HTTP body, returning zero or more
    /// decoded `StreamChunk`s. Once a terminal chunk has been returned, all
    /// further input is ignored.
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
        if line.is_empty() {
            return;
        }
        let Some(data) = line.strip_prefix("data: ") else {
            return;
        };
        if data == "[DONE]" {
            self.finish(None, out);
            return;
        }

        let event: StreamEvent = match serde_json::from_str(data) {
            Ok(e) => e,
            Err(e) => {
                out.push(StreamChunk::Error {
                    code: ErrorCode::ApiError,
                    message: format!("malformed OpenAI stream event: {e}"),
                });
                self.done = true;
                return;
            }
        };

        let usage = event.usage.as_ref().map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        for choice in &event.choices {
            if let Some(text) = &choice.delta.content {
                if !text.is_empty() {
                    out.push(StreamChunk::Text { text: text.clone() });
                }
            }
            if let Some(deltas) = &choice.delta.tool_calls {
                for d in deltas {
                    let state = self.tool_states.entry(d.index).or_default();
                    if let Some(id) = &d.id {
                        state.id = id.clone();
                    }
                    if let Some(name) = &d.function.name {
                        state.name = name.clone();
                    }
                    state.arguments.push_str(&d.function.arguments);
                }
            }
            if choice.finish_reason.as_deref() == Some("tool_calls") {
                self.drain_tool_calls(out);
            }
            if choice.finish_reason.is_some() {
                self.finish(usage, out);
                return;
            }
        }
    }

    fn drain_tool_calls(&mut self, out: &mut Vec<StreamChunk>) {
        for (_, state) in self.tool_states.drain() {
            if state.name.is_empty() {
                tracing::warn!(provider = %self.provider, "dropping tool call with empty name");
                continue;
            }
            if serde_json::from_str::<serde_json::Value>(&state.arguments).is_err() {
                tracing::warn!(provider = %self.provider, "dropping tool call with non-JSON arguments");
                continue;
            }
            out.push(StreamChunk::ToolCall {
                id: state.id,
                name: state.name,
                arguments: state.arguments,
            });
        }
    }

    fn finish(&mut self, usage: Option<Usage>, out: &mut Vec<StreamChunk>) {
        self.drain_tool_calls(out);
        out.push(StreamChunk::Done { usage });
        self.done = true;
    }
}

/// Maps an HTTP status/body pair from the chat-completions endpoint onto the
/// canonical error taxonomy.
pub fn map_http_error(provider: &str, status: u16, body: &str) -> GatewayError {
    let code = match status {
        401 | 403 => ErrorCode::AuthFailed,
        402 => ErrorCode::InsufficientCredits,
        408 => ErrorCode::Timeout,
        429 => ErrorCode::RateLimited,
        400 if body.contains("context_length_exceeded") => ErrorCode::ContextLengthExceeded,
        400 | 422 => ErrorCode::InvalidRequest,
        _ => ErrorCode::ApiError,
    };
    GatewayError::new(code, provider, format!("HTTP {status}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_deltas_then_done() {
        let mut decoder = OpenAiStreamDecoder::new("openai");
        let chunk1 = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n";
        let chunk2 = b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\ndata: [DONE]\n";
        let mut out = decoder.feed(chunk1);
        out.extend(decoder.feed(chunk2));
        assert_eq!(out.len(), 3);
        assert!(matches!(&out[0], StreamChunk::Text { text } if text == "Hel"));
        assert!(matches!(&out[1], StreamChunk::Text { text } if text == "lo"));
        assert!(matches!(&out[2], StreamChunk::Done { usage: None }));
    }

    #[test]
    fn accumulates_tool_call_arguments_across_chunks_and_emits_once() {
        let mut decoder = OpenAiStreamDecoder::new("openai");
        let events = [
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":null,"arguments":"{\"path\""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"name":null,"arguments":":\"a.rs\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ];
        let mut out = Vec::new();
        for e in events {
            out.extend(decoder.feed(format!("{e}\n").as_bytes()));
        }
        let tool_calls: Vec<_> = out
            .iter()
            .filter(|c| matches!(c, StreamChunk::ToolCall { .. }))
            .collect();
        assert_eq!(tool_calls.len(), 1);
        if let StreamChunk::ToolCall { id, name, arguments } = tool_calls[0] {
            assert_eq!(id, "call_1");
            assert_eq!(name, "read_file");
            assert_eq!(arguments, r#"{"path":"a.rs"}"#);
        }
        assert!(matches!(out.last(), Some(StreamChunk::Done { .. })));
    }

    #[test]
    fn split_sse_line_across_feed_calls_still_decodes() {
        let mut decoder = OpenAiStreamDecoder::new("openai");
        let mut out = decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}");
        out.extend(decoder.feed(b"}}]}\ndata: [DONE]\n"));
        assert!(matches!(&out[0], StreamChunk::Text { text } if text == "hi"));
    }

    #[test]
    fn status_codes_map_to_canonical_error_codes() {
        assert_eq!(map_http_error("openai", 429, "").code, ErrorCode::RateLimited);
        assert_eq!(map_http_error("openai", 401, "").code, ErrorCode::AuthFailed);
        assert_eq!(
            map_http_error("openai", 400, "context_length_exceeded").code,
            ErrorCode::ContextLengthExceeded
        );
    }
}

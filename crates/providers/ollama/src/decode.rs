//! Incremental NDJSON decoder for Ollama's `/api/chat` streaming endpoint.
//!
//! Each line is a standalone JSON object terminated by `done: true`, not an
//! SSE `data:` frame. Tool calls are not parsed from a structured field:
//! per the system-prompt-preamble convention, the accumulated assistant text
//! is scanned for a `Tool call: name({...})` line. This is inherently
//! best-effort — a call split across a line boundary or wrapped in
//! surrounding prose may not match, and a match with invalid JSON arguments
//! is dropped rather than guessed at.

use once_cell::sync::Lazy;
use regex::Regex;

use theo_core::{ErrorCode, GatewayError, StreamChunk, Usage};

use crate::wire::StreamResponse;

static TOOL_CALL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Tool call:\s*([A-Za-z_][A-Za-z0-9_]*)\((\{.*\})\)\s*$").unwrap());

#[derive(Default)]
pub struct OllamaStreamDecoder {
    provider: String,
    line_buffer: String,
    text_buffer: String,
    emitted_tool_calls: usize,
    done: bool,
}

impl OllamaStreamDecoder {
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
            let line = self.line_buffer[..pos].trim().to_string();
            self.line_buffer.drain(..=pos);
            if self.done {
                break;
            }
            if !line.is_empty() {
                self.process_line(&line, &mut out);
            }
        }
        out
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<StreamChunk>) {
        let event: StreamResponse = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                out.push(StreamChunk::Error {
                    code: ErrorCode::ApiError,
                    message: format!("malformed Ollama NDJSON line: {e}"),
                });
                self.done = true;
                return;
            }
        };

        if let Some(message) = &event.message {
            if !message.content.is_empty() {
                self.text_buffer.push_str(&message.content);
            }
        }

        if event.done {
            self.drain_tool_calls(out);
            let usage = match (event.prompt_eval_count, event.eval_count) {
                (Some(input_tokens), Some(output_tokens)) => Some(Usage { input_tokens, output_tokens }),
                _ => None,
            };
            out.push(StreamChunk::Done { usage });
            self.done = true;
        }
    }

    /// Scans accumulated assistant text for `Tool call: name({...})` lines,
    /// emitting a `ToolCall` chunk for each well-formed match and leaving the
    /// surrounding prose (if any) to have already been reported as text by
    /// the caller's own buffering — this decoder only emits structured tool
    /// calls here, never raw text, since Ollama's non-streaming `/api/chat`
    /// response delivers the full message content in the final `done` line.
    fn drain_tool_calls(&mut self, out: &mut Vec<StreamChunk>) {
        let text = std::mem::take(&mut self.text_buffer);
        let mut remainder_is_text_only = true;

        for capture in TOOL_CALL_RE.captures_iter(&text) {
            remainder_is_text_only = false;
            let name = capture[1].to_string();
            let args = &capture[2];
            match serde_json::from_str::<serde_json::Value>(args) {
                Ok(_) => {
                    self.emitted_tool_calls += 1;
                    out.push(StreamChunk::ToolCall {
                        id: format!("call_{}_{}", name, self.emitted_tool_calls),
                        name,
                        arguments: args.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %self.provider,
                        tool = %name,
                        error = %e,
                        "dropping malformed tool call arguments"
                    );
                }
            }
        }

        if remainder_is_text_only && !text.is_empty() {
            out.insert(0, StreamChunk::Text { text });
        }
    }
}

/// Maps an HTTP status/body pair from the `/api/chat` endpoint onto the
/// canonical error taxonomy.
pub fn map_http_error(provider: &str, status: u16, body: &str) -> GatewayError {
    let code = match status {
        401 | 403 => ErrorCode::AuthFailed,
        408 => ErrorCode::Timeout,
        429 => ErrorCode::RateLimited,
        400 if body.contains("context") && body.contains("length") => ErrorCode::ContextLengthExceeded,
        400 | 404 | 422 => ErrorCode::InvalidRequest,
        _ => ErrorCode::ApiError,
    };
    GatewayError::new(code, provider, format!("HTTP {status}: {body}"))
}

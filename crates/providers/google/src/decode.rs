//! Incremental SSE decoder for `streamGenerateContent?alt=sse`.
//!
//! Unlike OpenAI/Anthropic, Gemini does not stream tool-call arguments as
//! incremental JSON fragments: a `functionCall` part always arrives with its
//! `args` already fully formed in a single event, so the decoder emits a
//! `StreamChunk::ToolCall` as soon as one appears rather than accumulating
//! across events.

use theo_core::{ErrorCode, GatewayError, StreamChunk, Usage};

use crate::wire::StreamResponse;

#[derive(Default)]
pub struct GoogleStreamDecoder {
    provider: String,
    line_buffer: String,
    done: bool,
}

impl GoogleStreamDecoder {
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

        let event: StreamResponse = match serde_json::from_str(data) {
            Ok(e) => e,
            Err(e) => {
                out.push(StreamChunk::Error {
                    code: ErrorCode::ApiError,
                    message: format!("malformed Gemini stream event: {e}"),
                });
                self.done = true;
                return;
            }
        };

        let usage = event.usage_metadata.as_ref().map(|u| Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        });

        let mut finished = false;
        for candidate in &event.candidates {
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    if let Some(text) = &part.text {
                        if !text.is_empty() {
                            out.push(StreamChunk::Text { text: text.clone() });
                        }
                    }
                    if let Some(call) = &part.function_call {
                        if call.name.is_empty() {
                            tracing::warn!(provider = %self.provider, "dropping tool call with empty name");
                            continue;
                        }
                        out.push(StreamChunk::ToolCall {
                            id: format!("call_{}", call.name),
                            name: call.name.clone(),
                            arguments: call.args.to_string(),
                        });
                    }
                }
            }
            if candidate.finish_reason.is_some() {
                finished = true;
            }
        }

        if finished {
            out.push(StreamChunk::Done { usage });
            self.done = true;
        }
    }
}

/// Maps an HTTP status/body pair from the `generateContent` endpoint onto
/// the canonical error taxonomy.
pub fn map_http_error(provider: &str, status: u16, body: &str) -> GatewayError {
    let code = match status {
        401 | 403 => ErrorCode::AuthFailed,
        402 => ErrorCode::InsufficientCredits,
        408 => ErrorCode::Timeout,
        429 => ErrorCode::RateLimited,
        400 if body.contains("exceeds the maximum") || body.contains("token count") => {
            ErrorCode::ContextLengthExceeded
        }
        400 | 422 => ErrorCode::InvalidRequest,
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
    fn decodes_text_then_done_with_usage() {
        let mut decoder = GoogleStreamDecoder::new("google");
        let input = sse(&[
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"lo"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":2}}"#,
        ]);
        let out = decoder.feed(&input);
        assert!(matches!(&out[0], StreamChunk::Text { text } if text == "Hel"));
        assert!(matches!(&out[1], StreamChunk::Text { text } if text == "lo"));
        match out.last().unwrap() {
            StreamChunk::Done { usage: Some(u) } => {
                assert_eq!(u.input_tokens, 3);
                assert_eq!(u.output_tokens, 2);
            }
            other => panic!("expected Done with usage, got {other:?}"),
        }
    }

    #[test]
    fn function_call_part_emits_tool_call_whole() {
        let mut decoder = GoogleStreamDecoder::new("google");
        let input = sse(&[
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"read_file","args":{"path":"a.rs"}}}]},"finishReason":"STOP"}]}"#,
        ]);
        let out = decoder.feed(&input);
        assert!(matches!(&out[0], StreamChunk::ToolCall { name, .. } if name == "read_file"));
    }

    #[test]
    fn status_codes_map_to_canonical_error_codes() {
        assert_eq!(map_http_error("google", 429, "").code, ErrorCode::RateLimited);
        assert_eq!(map_http_error("google", 401, "").code, ErrorCode::AuthFailed);
    }
}

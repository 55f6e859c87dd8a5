//! Uniform streaming chunk type produced by every adapter's decoder.
//!
//! A well-formed stream is zero or more non-terminal chunks followed by
//! exactly one terminal chunk (`Done` or `Error`).

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// Token usage reported by a provider, normalized across vendor field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The canonical error codes the gateway emits, shared between the adapter
/// error funnel and the resilience layer's classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthFailed,
    RateLimited,
    InvalidRequest,
    ContextLengthExceeded,
    InsufficientCredits,
    NetworkError,
    Timeout,
    ApiError,
    Cancelled,
    CircuitOpen,
}

/// A single element of a provider response stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Text { text: String },
    ToolCall { id: String, name: String, arguments: String },
    Done { usage: Option<Usage> },
    Error { code: ErrorCode, message: String },
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done { .. } | StreamChunk::Error { .. })
    }

    pub fn tool_call(call: ToolCall) -> Self {
        StreamChunk::ToolCall {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

/// Validates the well-formedness invariant over a complete, already-collected
/// stream: zero or more non-terminal chunks, then exactly one terminal chunk.
///
/// Adapters build their decoders to uphold this by construction; this helper
/// exists for tests and for any caller that buffers a stream before use.
pub fn validate_stream_shape(chunks: &[StreamChunk]) -> Result<(), StreamShapeError> {
    if chunks.is_empty() {
        return Err(StreamShapeError::MissingTerminal);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let is_last = i == chunks.len() - 1;
        if chunk.is_terminal() && !is_last {
            return Err(StreamShapeError::TerminalNotLast(i));
        }
        if !chunk.is_terminal() && is_last {
            return Err(StreamShapeError::MissingTerminal);
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamShapeError {
    #[error("stream has no terminal chunk")]
    MissingTerminal,
    #[error("terminal chunk appeared at index {0}, not at the end of the stream")]
    TerminalNotLast(usize),
}

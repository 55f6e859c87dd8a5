//! The common capability set every provider adapter implements.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::GatewayError;
use crate::message::Message;
use crate::stream::StreamChunk;
use crate::tool::UniversalToolDefinition;

/// Per-call generation options that are not part of the message history itself.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Capability set common to every backend: OpenAI, Anthropic, Google,
/// OpenRouter, Ollama and similar OpenAI-compatible vendors.
///
/// `generate_stream` never returns an `Err` to the caller from within a
/// stream in progress — all adapter failures funnel through the
/// provider-specific mapper and surface as a terminal
/// `StreamChunk::Error`. A `Result` is returned only for failures that occur
/// before the stream itself starts (e.g. request construction, credential
/// resolution).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
    fn context_limit(&self) -> u32;
    fn supports_tool_calling(&self) -> bool;

    /// Validates the adapter's own configuration (model name known, tool
    /// support requested only where available, etc.) independent of any
    /// network call.
    fn validate_config(&self) -> Result<(), GatewayError>;

    /// Estimates the token count of a message history, using a vendor
    /// tokenizer when available or an adapter-specific heuristic otherwise.
    fn count_tokens(&self, messages: &[Message]) -> u32;

    async fn generate_stream(
        &self,
        messages: &[Message],
        tools: Option<&[UniversalToolDefinition]>,
        options: &GenerateOptions,
    ) -> Result<ChunkStream, GatewayError>;
}

//! OpenAI chat-completions adapter: wires the wire-format translation
//! (`wire`) and incremental SSE decoder (`decode`) into the shared
//! `theo_core::ProviderAdapter` trait, using the pool's shared connection
//! per host.
//!
//! Also serves as the base for other OpenAI-compatible vendors (OpenRouter):
//! those crates reuse `wire`/`decode` and only change the base URL, header
//! shape and context-limit table.

pub mod decode;
pub mod wire;

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use theo_core::{
    tokencount::{heuristic_count, DEFAULT_CHARS_PER_TOKEN},
    ChunkStream, ErrorCode, GatewayError, GenerateOptions, Message, ProviderAdapter,
    StreamChunk, TokenCountCache, UniversalToolDefinition,
};
use theo_pool::ConnectionPool;

use decode::OpenAiStreamDecoder;

/// Static table of known context-window sizes; unknown models fall back to
/// a conservative default rather than failing `validate_config`.
fn context_limit_for(model: &str) -> u32 {
    if model.starts_with("gpt-4o") || model.starts_with("gpt-4.1") {
        128_000
    } else if model.starts_with("o1") || model.starts_with("o3") {
        200_000
    } else if model.starts_with("gpt-3.5") {
        16_385
    } else {
        128_000
    }
}

pub struct OpenAiAdapter {
    model: String,
    api_key: String,
    base_url: String,
    pool: std::sync::Arc<ConnectionPool>,
    context_limit: u32,
    token_cache: Mutex<TokenCountCache>,
}

impl OpenAiAdapter {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
        pool: std::sync::Arc<ConnectionPool>,
    ) -> Self {
        let model = model.into();
        let context_limit = context_limit_for(&model);
        Self {
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            context_limit,
            model,
            pool,
            token_cache: Mutex::new(TokenCountCache::default()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn host(&self) -> String {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| format!("{h}:{}", u.port_or_known_default().unwrap_or(443))))
            .unwrap_or_else(|| self.base_url.clone())
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_limit(&self) -> u32 {
        self.context_limit
    }

    fn supports_tool_calling(&self) -> bool {
        true
    }

    fn validate_config(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::new(
                ErrorCode::InvalidRequest,
                self.provider(),
                "model name must not be empty",
            ));
        }
        Ok(())
    }

    fn count_tokens(&self, messages: &[Message]) -> u32 {
        let mut cache = self.token_cache.lock().expect("token cache mutex poisoned");
        cache.get_or_compute(messages, || {
            messages
                .iter()
                .map(|m| heuristic_count(&m.content.flatten_to_text(), DEFAULT_CHARS_PER_TOKEN))
                .sum()
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tools: Option<&[UniversalToolDefinition]>,
        options: &GenerateOptions,
    ) -> Result<ChunkStream, GatewayError> {
        let request = wire::ChatRequest {
            model: &self.model,
            messages: wire::to_chat_messages(messages),
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            top_p: options.top_p,
            tools: tools.map(wire::to_tool_specs),
        };

        let conn = self
            .pool
            .acquire(&self.host())
            .await
            .map_err(|e| GatewayError::new(ErrorCode::NetworkError, self.provider(), e.to_string()))?;

        let response = conn
            .client()
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(self.provider(), e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(decode::map_http_error(self.provider(), status, &body));
        }

        let provider = self.provider().to_string();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<StreamChunk>();

        tokio::spawn(async move {
            let _conn = conn;
            let mut byte_stream = response.bytes_stream();
            let mut decoder = OpenAiStreamDecoder::new(provider);
            loop {
                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        for chunk in decoder.feed(&bytes) {
                            let terminal = chunk.is_terminal();
                            if tx.send(chunk).is_err() {
                                return;
                            }
                            if terminal {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(StreamChunk::Error {
                            code: ErrorCode::NetworkError,
                            message: e.to_string(),
                        });
                        return;
                    }
                    None => {
                        for chunk in decoder.feed(b"") {
                            let _ = tx.send(chunk);
                        }
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async { rx.recv().await.map(|item| (item, rx)) });
        Ok(Box::pin(stream))
    }
}

fn map_reqwest_error(provider: &str, err: reqwest::Error) -> GatewayError {
    let code = if err.is_timeout() {
        ErrorCode::Timeout
    } else {
        ErrorCode::NetworkError
    };
    GatewayError::new(code, provider, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> OpenAiAdapter {
        OpenAiAdapter::new(
            "gpt-4o-mini",
            "sk-test",
            None,
            ConnectionPool::new(theo_core::PoolConfig::default()),
        )
    }

    #[test]
    fn context_limit_known_model_family() {
        assert_eq!(context_limit_for("gpt-4o-mini"), 128_000);
        assert_eq!(context_limit_for("o1-preview"), 200_000);
    }

    #[test]
    fn empty_model_fails_validation() {
        let a = OpenAiAdapter::new("", "key", None, ConnectionPool::new(theo_core::PoolConfig::default()));
        assert!(a.validate_config().is_err());
    }

    #[test]
    fn token_count_is_memoized() {
        let adapter = adapter();
        let messages = vec![Message::new(
            theo_core::Role::User,
            theo_core::Content::Text("hello there".into()),
        )];
        let first = adapter.count_tokens(&messages);
        let second = adapter.count_tokens(&messages);
        assert_eq!(first, second);
        assert!(first > 0);
    }
}

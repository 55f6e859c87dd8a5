//! OpenRouter adapter: OpenRouter exposes the same chat-completions wire
//! shape as OpenAI, so this crate reuses `theo_provider_openai`'s `wire` and
//! `decode` modules wholesale and only changes the base URL, auth header
//! set and context-limit table.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use theo_core::{
    tokencount::{heuristic_count, DEFAULT_CHARS_PER_TOKEN},
    ChunkStream, ErrorCode, GatewayError, GenerateOptions, Message, ProviderAdapter,
    StreamChunk, TokenCountCache, UniversalToolDefinition,
};
use theo_pool::ConnectionPool;
use theo_provider_openai::{decode, decode::OpenAiStreamDecoder, wire};

/// OpenRouter proxies dozens of upstream models; without a live models
/// catalogue we fall back to a conservative default rather than guessing a
/// per-model limit.
const DEFAULT_CONTEXT_LIMIT: u32 = 128_000;

pub struct OpenRouterAdapter {
    model: String,
    api_key: String,
    base_url: String,
    referer: Option<String>,
    title: Option<String>,
    pool: std::sync::Arc<ConnectionPool>,
    token_cache: Mutex<TokenCountCache>,
}

impl OpenRouterAdapter {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<String>,
        pool: std::sync::Arc<ConnectionPool>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            model: model.into(),
            referer: None,
            title: None,
            pool,
            token_cache: Mutex::new(TokenCountCache::default()),
        }
    }

    pub fn with_attribution(mut self, referer: Option<String>, title: Option<String>) -> Self {
        self.referer = referer;
        self.title = title;
        self
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
impl ProviderAdapter for OpenRouterAdapter {
    fn provider(&self) -> &str {
        "openrouter"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_limit(&self) -> u32 {
        DEFAULT_CONTEXT_LIMIT
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
        if !self.model.contains('/') {
            return Err(GatewayError::new(
                ErrorCode::InvalidRequest,
                self.provider(),
                format!("OpenRouter model names are vendor-prefixed (e.g. \"openai/gpt-4o\"), got {:?}", self.model),
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

        let mut builder = conn.client().post(self.endpoint()).bearer_auth(&self.api_key);
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            builder = builder.header("X-Title", title);
        }

        let response = builder
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

    fn adapter(model: &str) -> OpenRouterAdapter {
        OpenRouterAdapter::new(model, "sk-or-test", None, ConnectionPool::new(theo_core::PoolConfig::default()))
    }

    #[test]
    fn unprefixed_model_name_fails_validation() {
        assert!(adapter("gpt-4o").validate_config().is_err());
    }

    #[test]
    fn vendor_prefixed_model_name_passes_validation() {
        assert!(adapter("openai/gpt-4o").validate_config().is_ok());
    }
}

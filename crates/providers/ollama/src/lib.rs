//! Ollama `/api/chat` adapter, wiring `wire`/`decode` into
//! `theo_core::ProviderAdapter`. Tool calls are surfaced via a
//! system-prompt preamble and regex extraction rather than Ollama's native
//! `tools`/`tool_calls` fields, matching the gateway's documented wire
//! contract for this provider.

pub mod decode;
pub mod wire;

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use theo_core::{
    tokencount::{heuristic_count, OLLAMA_CHARS_PER_TOKEN},
    ChunkStream, ErrorCode, GatewayError, GenerateOptions, Message, ProviderAdapter, StreamChunk,
    TokenCountCache, UniversalToolDefinition,
};
use theo_pool::ConnectionPool;

use decode::OllamaStreamDecoder;

/// Ollama does not publish a models catalogue the adapter can query, and the
/// context window varies by locally pulled model; this is the common
/// default (`num_ctx`) for unmodified Modelfiles.
const DEFAULT_CONTEXT_LIMIT: u32 = 4_096;

pub struct OllamaAdapter {
    model: String,
    base_url: String,
    pool: std::sync::Arc<ConnectionPool>,
    context_limit: u32,
    token_cache: Mutex<TokenCountCache>,
}

impl OllamaAdapter {
    pub fn new(model: impl Into<String>, base_url: Option<String>, pool: std::sync::Arc<ConnectionPool>) -> Self {
        Self {
            model: model.into(),
            base_url: base_url.unwrap_or_else(|| {
                std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string())
            }),
            pool,
            context_limit: DEFAULT_CONTEXT_LIMIT,
            token_cache: Mutex::new(TokenCountCache::default()),
        }
    }

    pub fn with_context_limit(mut self, context_limit: u32) -> Self {
        self.context_limit = context_limit;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn host(&self) -> String {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| format!("{h}:{}", u.port_or_known_default().unwrap_or(11434))))
            .unwrap_or_else(|| self.base_url.clone())
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn provider(&self) -> &str {
        "ollama"
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
                .map(|m| heuristic_count(&m.content.flatten_to_text(), OLLAMA_CHARS_PER_TOKEN))
                .sum()
        })
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
        tools: Option<&[UniversalToolDefinition]>,
        options: &GenerateOptions,
    ) -> Result<ChunkStream, GatewayError> {
        let preamble = tools.and_then(wire::render_tool_preamble);
        let request = wire::ChatRequest {
            model: self.model.clone(),
            messages: wire::to_chat_messages(messages, preamble.as_deref()),
            stream: true,
            options: Some(wire::ChatOptions {
                temperature: options.temperature,
                top_p: options.top_p,
                num_predict: options.max_tokens,
            }),
        };

        let conn = self
            .pool
            .acquire(&self.host())
            .await
            .map_err(|e| GatewayError::new(ErrorCode::NetworkError, self.provider(), e.to_string()))?;

        let response = conn
            .client()
            .post(self.endpoint())
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
            let mut decoder = OllamaStreamDecoder::new(provider);
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

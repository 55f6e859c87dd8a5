//! Provider-agnostic OAuth 2.0 Authorization Code + PKCE flow.
//!
//! `OAuthProvider` implementations only know their own authorization/token
//! endpoints; this module owns the PKCE bookkeeping, the loopback callback
//! server and token lifecycle (`authenticate`, `refresh_tokens`,
//! `get_valid_token`).

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::pkce::PkcePair;
use crate::secret_store::{SecretStore, SecretStoreError, TokenSet};

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("http request to OAuth endpoint failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned an unexpected response: {0}")]
    InvalidResponse(String),
    #[error("timed out waiting for the OAuth callback")]
    CallbackTimeout,
    #[error("callback state {got:?} did not match expected {expected:?}")]
    StateMismatch { expected: String, got: String },
    #[error("callback did not include an authorization code")]
    MissingCode,
    #[error("failed to bind loopback callback listener on port {0}: {1}")]
    CallbackBind(u16, std::io::Error),
    #[error(transparent)]
    SecretStore(#[from] SecretStoreError),
    #[error("no stored OAuth tokens for provider {0}")]
    NoStoredTokens(String),
    #[error("stored tokens for provider {0} have no refresh token; the authorization flow must be restarted")]
    NoRefreshToken(String),
}

/// Provider-specific OAuth endpoints and token exchange logic.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn name(&self) -> &str;

    fn authorization_url(&self, pkce: &PkcePair, redirect_uri: &str) -> String;

    async fn exchange_code(
        &self,
        code: &str,
        pkce: &PkcePair,
        redirect_uri: &str,
    ) -> Result<TokenSet, OAuthError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, OAuthError>;
}

/// Runs a one-shot HTTP listener on `127.0.0.1:{port}` that accepts a single
/// `GET /callback?code=...&state=...` request, validates `state`, and
/// returns the authorization code. Hand-rolled directly over
/// `tokio::net::TcpListener` since no HTTP server crate is in the dependency
/// stack.
pub async fn run_callback_server(
    port: u16,
    expected_state: &str,
    timeout: Duration,
) -> Result<String, OAuthError> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| OAuthError::CallbackBind(port, e))?;

    let accept = async {
        let (stream, _) = listener.accept().await.map_err(|e| OAuthError::CallbackBind(port, e))?;
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .await
            .map_err(|e| OAuthError::CallbackBind(port, e))?;

        let path = request_line
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| OAuthError::InvalidResponse(request_line.clone()))?;
        let (code, state) = parse_callback_path(path)?;

        if state != expected_state {
            respond(&mut reader, 400, "invalid state").await;
            return Err(OAuthError::StateMismatch {
                expected: expected_state.to_string(),
                got: state,
            });
        }

        respond(&mut reader, 200, "Authentication complete. You can close this tab.").await;
        Ok(code)
    };

    tokio::time::timeout(timeout, accept)
        .await
        .map_err(|_| OAuthError::CallbackTimeout)?
}

async fn respond<S>(stream: &mut BufReader<S>, status: u16, body: &str)
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let reason = if status == 200 { "OK" } else { "Bad Request" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.get_mut().write_all(response.as_bytes()).await;
    let _ = stream.get_mut().flush().await;
}

fn parse_callback_path(path: &str) -> Result<(String, String), OAuthError> {
    let query = path.split_once('?').map(|(_, q)| q).unwrap_or("");
    let mut code = None;
    let mut state = None;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            match key {
                "code" => code = Some(urlencoding_decode(value)),
                "state" => state = Some(urlencoding_decode(value)),
                _ => {}
            }
        }
    }
    let code = code.ok_or(OAuthError::MissingCode)?;
    let state = state.unwrap_or_default();
    Ok((code, state))
}

fn urlencoding_decode(value: &str) -> String {
    url::form_urlencoded::parse(value.replace('+', "%20").as_bytes())
        .map(|(k, _)| k.into_owned())
        .next()
        .unwrap_or_else(|| value.to_string())
}

/// Drives the full interactive flow: builds the PKCE pair, hands the caller
/// the authorization URL to open, waits on the loopback callback, exchanges
/// the code for tokens, and persists them.
pub async fn authenticate(
    provider: &dyn OAuthProvider,
    store: &SecretStore,
    redirect_port: u16,
    callback_timeout: Duration,
    open_url: impl FnOnce(&str),
) -> Result<TokenSet, OAuthError> {
    let pkce = crate::pkce::generate_pair();
    let redirect_uri = format!("http://127.0.0.1:{redirect_port}/callback");
    let url = provider.authorization_url(&pkce, &redirect_uri);

    open_url(&url);

    let code = run_callback_server(redirect_port, &pkce.state, callback_timeout).await?;
    let tokens = provider.exchange_code(&code, &pkce, &redirect_uri).await?;
    store.set_oauth_tokens(provider.name(), &tokens)?;
    Ok(tokens)
}

/// Refreshes a provider's stored tokens and persists the new set. Returns
/// `NoRefreshToken` (not a hard failure when an API-key fallback exists at
/// the credential-resolution layer) when the stored token set never
/// received a refresh token, per §4.D's documented lifecycle: the caller
/// should restart the authorization flow instead of retrying here.
pub async fn refresh_tokens(
    provider: &dyn OAuthProvider,
    store: &SecretStore,
) -> Result<TokenSet, OAuthError> {
    let tokens = store
        .oauth_tokens(provider.name())?
        .ok_or_else(|| OAuthError::NoStoredTokens(provider.name().to_string()))?;
    let refresh_token = tokens
        .refresh_token
        .as_deref()
        .ok_or_else(|| OAuthError::NoRefreshToken(provider.name().to_string()))?;
    let refreshed = provider.refresh_token(refresh_token).await?;
    store.set_oauth_tokens(provider.name(), &refreshed)?;
    Ok(refreshed)
}

/// Serializes concurrent refresh attempts for the same provider so two
/// in-flight requests don't both trigger a refresh and race to persist tokens.
pub struct TokenLifecycle {
    refresh_lock: Mutex<()>,
}

impl Default for TokenLifecycle {
    fn default() -> Self {
        Self {
            refresh_lock: Mutex::new(()),
        }
    }
}

impl TokenLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a currently-valid access token (valid within the default 5
    /// minute refresh buffer), refreshing under lock if the stored token has
    /// expired or is about to. N concurrent callers for the same provider
    /// trigger exactly one network refresh: the second caller blocks on the
    /// lock and then re-checks validity before refreshing again.
    pub async fn get_valid_token(
        &self,
        provider: &dyn OAuthProvider,
        store: &SecretStore,
    ) -> Result<String, OAuthError> {
        if let Some(token) = store.valid_access_token(provider.name()) {
            return Ok(token);
        }
        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = store.valid_access_token(provider.name()) {
            return Ok(token);
        }
        tracing::info!(provider = provider.name(), "OAuth token expired, refreshing");
        let refreshed = refresh_tokens(provider, store).await?;
        Ok(refreshed.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_and_state_from_callback_path() {
        let (code, state) = parse_callback_path("/callback?code=abc123&state=xyz").unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state, "xyz");
    }

    #[test]
    fn missing_code_is_rejected() {
        let result = parse_callback_path("/callback?state=xyz");
        assert!(matches!(result, Err(OAuthError::MissingCode)));
    }

    #[test]
    fn missing_state_defaults_to_empty_string() {
        let (_, state) = parse_callback_path("/callback?code=abc123").unwrap();
        assert_eq!(state, "");
    }
}

//! Keyring-backed storage for API keys and OAuth token sets.
//!
//! All operations go directly to the OS keychain (Keychain on macOS,
//! Credential Manager on Windows, Secret Service on Linux) — the store holds
//! no state of its own beyond the service name it stores entries under.

use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};

const SERVICE_NAME: &str = "theo-code-oauth";

/// The default lookahead window: a token is treated as expired this long
/// before its actual `expires_at`, so a refresh has time to complete before
/// the old token would actually be rejected by the provider.
pub const DEFAULT_REFRESH_BUFFER_MS: i64 = 5 * 60 * 1000;

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// An OAuth token set, as persisted in the keychain. `refresh_token` is
/// absent for providers that only issue short-lived access tokens with no
/// refresh grant; `scope` is absent when the provider's token response
/// omits it (implying the originally requested scope was granted as-is).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenSet {
    /// `true` once `expires_at` has passed, ignoring the refresh buffer —
    /// use [`TokenSet::is_valid`] to decide whether a caller should still
    /// use this token for a new request.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// A token is valid if `now + buffer_ms < expires_at`; i.e. it is not
    /// expired and won't expire within the next `buffer_ms` either.
    pub fn is_valid(&self, buffer_ms: i64) -> bool {
        Utc::now() + chrono::Duration::milliseconds(buffer_ms) < self.expires_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("keyring access failed for key {0:?}: {1}")]
    Keyring(String, keyring::Error),
    #[error("stored OAuth token set for {0:?} is not valid JSON: {1}")]
    Corrupt(String, serde_json::Error),
}

/// Secure storage for API keys and OAuth token sets, backed by the system keyring.
#[derive(Debug, Default)]
pub struct SecretStore;

impl SecretStore {
    pub fn new() -> Self {
        Self
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        let entry = Entry::new(SERVICE_NAME, key)
            .map_err(|e| SecretStoreError::Keyring(key.to_string(), e))?;
        entry
            .set_password(value)
            .map_err(|e| SecretStoreError::Keyring(key.to_string(), e))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let entry = Entry::new(SERVICE_NAME, key).ok()?;
        entry.get_password().ok()
    }

    pub fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let entry = Entry::new(SERVICE_NAME, key)
            .map_err(|e| SecretStoreError::Keyring(key.to_string(), e))?;
        entry
            .delete_credential()
            .map_err(|e| SecretStoreError::Keyring(key.to_string(), e))
    }

    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.get(&api_key_entry(provider))
    }

    pub fn set_api_key(&self, provider: &str, value: &str) -> Result<(), SecretStoreError> {
        self.set(&api_key_entry(provider), value)
    }

    pub fn set_oauth_tokens(&self, provider: &str, tokens: &TokenSet) -> Result<(), SecretStoreError> {
        let json = serde_json::to_string(tokens)
            .map_err(|e| SecretStoreError::Corrupt(provider.to_string(), e))?;
        self.set(&oauth_entry(provider), &json)
    }

    pub fn oauth_tokens(&self, provider: &str) -> Result<Option<TokenSet>, SecretStoreError> {
        let Some(json) = self.get(&oauth_entry(provider)) else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| SecretStoreError::Corrupt(provider.to_string(), e))
    }

    pub fn delete_oauth_tokens(&self, provider: &str) -> Result<(), SecretStoreError> {
        self.delete(&oauth_entry(provider))
    }

    /// The access token if present and valid within the default refresh
    /// buffer; `None` otherwise, without attempting a refresh. A corrupt
    /// stored entry is treated the same as an absent one (see
    /// `SecretStoreError::Corrupt` callers).
    pub fn valid_access_token(&self, provider: &str) -> Option<String> {
        self.valid_access_token_with_buffer(provider, DEFAULT_REFRESH_BUFFER_MS)
    }

    pub fn valid_access_token_with_buffer(&self, provider: &str, buffer_ms: i64) -> Option<String> {
        let tokens = self.oauth_tokens(provider).ok().flatten()?;
        if tokens.is_valid(buffer_ms) {
            Some(tokens.access_token)
        } else {
            None
        }
    }
}

fn api_key_entry(provider: &str) -> String {
    format!("api_key_{provider}")
}

fn oauth_entry(provider: &str) -> String {
    format!("oauth-tokens-{provider}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tokens(expires_at: DateTime<Utc>) -> TokenSet {
        TokenSet {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_at,
            token_type: default_token_type(),
            scope: None,
        }
    }

    #[test]
    fn expired_token_set_reports_expired() {
        assert!(tokens(Utc::now() - Duration::seconds(1)).is_expired());
    }

    #[test]
    fn future_token_set_reports_not_expired() {
        assert!(!tokens(Utc::now() + Duration::hours(1)).is_expired());
    }

    #[test]
    fn token_within_refresh_buffer_is_not_valid() {
        let t = tokens(Utc::now() + Duration::seconds(30));
        assert!(!t.is_expired());
        assert!(!t.is_valid(DEFAULT_REFRESH_BUFFER_MS));
    }

    #[test]
    fn token_well_past_the_refresh_buffer_is_valid() {
        let t = tokens(Utc::now() + Duration::hours(1));
        assert!(t.is_valid(DEFAULT_REFRESH_BUFFER_MS));
    }

    #[test]
    fn missing_refresh_token_round_trips_as_none() {
        let mut t = tokens(Utc::now() + Duration::hours(1));
        t.refresh_token = None;
        let json = serde_json::to_string(&t).unwrap();
        let parsed: TokenSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.refresh_token, None);
    }

    #[test]
    fn entry_names_are_namespaced_per_provider() {
        assert_eq!(api_key_entry("openai"), "api_key_openai");
        assert_eq!(oauth_entry("anthropic"), "oauth-tokens-anthropic");
    }
}

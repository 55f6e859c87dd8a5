//! Resolves which credential an adapter should use for a provider, honoring
//! the configured preference and fallback policy.
//!
//! Precedence has three levels: (1) the `<PROVIDER>_API_KEY` environment
//! variable, (2) the configured API key, (3) a stored OAuth token.
//! `PreferredAuthMethod` only swaps (2) and (3); the environment variable is
//! always tried first and is never reordered.

use theo_core::{PreferredAuthMethod, ProviderSettings};

use crate::secret_store::SecretStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    OAuthAccessToken(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no credential available for provider {0} (no api key configured and no valid OAuth token stored)")]
    NoCredential(String),
}

/// Resolves a credential for `provider`. The `<PROVIDER>_API_KEY`
/// environment variable, if set, always wins outright. Otherwise the
/// configured API key and a stored OAuth token are ordered per
/// `settings.preferred_method`, falling back to the other when
/// `enable_fallback` is set and the preferred one is unavailable.
pub fn resolve_credential(
    provider: &str,
    settings: &ProviderSettings,
    store: &SecretStore,
) -> Result<Credential, CredentialError> {
    if let Some(key) = &settings.env_api_key {
        return Ok(Credential::ApiKey(key.clone()));
    }

    let api_key = settings.api_key.clone().map(Credential::ApiKey);
    let oauth_token = store
        .valid_access_token(provider)
        .map(Credential::OAuthAccessToken);

    let (primary, secondary) = match settings.preferred_method {
        PreferredAuthMethod::ApiKey => (api_key, oauth_token),
        PreferredAuthMethod::Oauth => (oauth_token, api_key),
    };

    if let Some(credential) = primary {
        return Ok(credential);
    }
    if settings.enable_fallback {
        if let Some(credential) = secondary {
            return Ok(credential);
        }
    }
    Err(CredentialError::NoCredential(provider.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(preferred: PreferredAuthMethod, api_key: Option<&str>, fallback: bool) -> ProviderSettings {
        ProviderSettings {
            api_key: api_key.map(str::to_string),
            env_api_key: None,
            base_url: None,
            preferred_method: preferred,
            enable_fallback: fallback,
            auto_refresh: true,
            oauth: None,
        }
    }

    #[test]
    fn api_key_preferred_and_present_wins() {
        let store = SecretStore::new();
        let settings = settings(PreferredAuthMethod::ApiKey, Some("sk-test"), true);
        let credential = resolve_credential("openai", &settings, &store).unwrap();
        assert_eq!(credential, Credential::ApiKey("sk-test".to_string()));
    }

    #[test]
    fn missing_credential_without_fallback_is_an_error() {
        let store = SecretStore::new();
        let settings = settings(PreferredAuthMethod::Oauth, None, false);
        let result = resolve_credential("anthropic", &settings, &store);
        assert_eq!(
            result,
            Err(CredentialError::NoCredential("anthropic".to_string()))
        );
    }

    #[test]
    fn falls_back_to_api_key_when_oauth_preferred_but_absent() {
        let store = SecretStore::new();
        let settings = settings(PreferredAuthMethod::Oauth, Some("sk-fallback"), true);
        let credential = resolve_credential("google", &settings, &store).unwrap();
        assert_eq!(credential, Credential::ApiKey("sk-fallback".to_string()));
    }

    #[test]
    fn env_var_wins_even_when_oauth_is_preferred() {
        let store = SecretStore::new();
        let mut settings = settings(PreferredAuthMethod::Oauth, Some("sk-configured"), true);
        settings.env_api_key = Some("sk-env".to_string());
        let credential = resolve_credential("anthropic", &settings, &store).unwrap();
        assert_eq!(credential, Credential::ApiKey("sk-env".to_string()));
    }

    #[test]
    fn env_var_is_not_reordered_by_preferred_method() {
        let store = SecretStore::new();
        let mut api_key_preferred = settings(PreferredAuthMethod::ApiKey, Some("sk-configured"), true);
        api_key_preferred.env_api_key = Some("sk-env".to_string());
        let mut oauth_preferred = settings(PreferredAuthMethod::Oauth, Some("sk-configured"), true);
        oauth_preferred.env_api_key = Some("sk-env".to_string());

        let a = resolve_credential("anthropic", &api_key_preferred, &store).unwrap();
        let b = resolve_credential("anthropic", &oauth_preferred, &store).unwrap();
        assert_eq!(a, Credential::ApiKey("sk-env".to_string()));
        assert_eq!(a, b);
    }
}

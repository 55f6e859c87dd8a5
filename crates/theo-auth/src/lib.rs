//! Credential resolution, PKCE OAuth flows and keyring secret storage.

pub mod credential;
pub mod oauth;
pub mod pkce;
pub mod secret_store;

pub use credential::{resolve_credential, Credential, CredentialError};
pub use oauth::{authenticate, refresh_tokens, run_callback_server, OAuthError, OAuthProvider, TokenLifecycle};
pub use pkce::{
    generate_code_challenge, generate_code_verifier, generate_pair, generate_state,
    validate_code_verifier, PkcePair,
};
pub use secret_store::{SecretStore, SecretStoreError, TokenSet};

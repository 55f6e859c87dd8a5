//! Process-wide gateway configuration.
//!
//! `GatewayConfig` is loaded once from a TOML file plus environment-variable
//! overrides and handed by reference to every component's constructor. No
//! component reads the filesystem or environment directly beyond the
//! env-var overrides documented below.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Preferred credential method for a provider. The environment variable is
/// always tried first and is never affected by this setting; `Oauth` vs.
/// `ApiKey` only swaps the order of the configured key and the stored OAuth
/// token beneath it — see `resolve_credential`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferredAuthMethod {
    Oauth,
    ApiKey,
}

/// OAuth 2.0 endpoints and client metadata for a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub additional_params: HashMap<String, String>,
}

/// Per-provider settings: how to authenticate, and whether to fall back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    /// The `<PROVIDER>_API_KEY` environment variable, if set. Kept separate
    /// from `api_key` (the TOML-configured key) since it occupies its own,
    /// non-reorderable top precedence level — see `resolve_credential`.
    /// Never read from or written to the config file.
    #[serde(skip)]
    pub env_api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_preferred_method")]
    pub preferred_method: PreferredAuthMethod,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

fn default_preferred_method() -> PreferredAuthMethod {
    PreferredAuthMethod::ApiKey
}

fn default_true() -> bool {
    true
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            env_api_key: None,
            base_url: None,
            preferred_method: PreferredAuthMethod::ApiKey,
            enable_fallback: true,
            auto_refresh: true,
            oauth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_per_host")]
    pub max_per_host: usize,
    #[serde(default = "default_max_total")]
    pub max_total: usize,
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_timeout_ms: u64,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_per_host() -> usize {
    6
}
fn default_max_total() -> usize {
    64
}
fn default_keep_alive_ms() -> u64 {
    90_000
}
fn default_acquire_timeout_ms() -> u64 {
    10_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_host: default_max_per_host(),
            max_total: default_max_total(),
            keep_alive_timeout_ms: default_keep_alive_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_time_window_ms")]
    pub time_window_ms: u64,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_time_window_ms() -> u64 {
    60_000
}
fn default_open_timeout_ms() -> u64 {
    30_000
}
fn default_success_threshold() -> u32 {
    2
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            failure_threshold: default_failure_threshold(),
            time_window_ms: default_time_window_ms(),
            open_timeout_ms: default_open_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogConfig {
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
    #[serde(default = "default_audit_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_audit_max_files")]
    pub max_files: u32,
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}
fn default_audit_max_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_audit_max_files() -> u32 {
    5
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            max_bytes: default_audit_max_bytes(),
            max_files: default_audit_max_files(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,
    #[serde(default)]
    pub audit_log: AuditLogConfig,
}

/// The provider names this gateway knows about; used to reject unknown
/// entries in the config file at load time rather than silently ignoring them.
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "anthropic", "google", "openrouter", "ollama"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0:?}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse config file {0:?}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("unknown provider in config: {0}")]
    UnknownProvider(String),
}

impl GatewayConfig {
    /// Loads configuration from a TOML file, falling back to defaults rooted
    /// at `data_dir` when no file is present at `path`.
    pub fn load(path: &Path, data_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
            toml::from_str::<GatewayConfig>(&raw)
                .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?
        } else {
            GatewayConfig {
                data_dir: data_dir.clone(),
                pool: PoolConfig::default(),
                resilience: ResilienceConfig::default(),
                providers: HashMap::new(),
                audit_log: AuditLogConfig::default(),
            }
        };
        config.validate()?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for name in self.providers.keys() {
            if !KNOWN_PROVIDERS.contains(&name.as_str()) {
                return Err(ConfigError::UnknownProvider(name.clone()));
            }
        }
        Ok(())
    }

    /// Applies env-var overrides: `<PROVIDER>_API_KEY` for each known
    /// provider (stored separately from the configured `api_key`, as its own
    /// top-precedence credential source — see `resolve_credential`), and
    /// `OLLAMA_BASE_URL` (defaulting to the local Ollama daemon) for
    /// Ollama's base URL.
    fn apply_env_overrides(&mut self) {
        for provider in KNOWN_PROVIDERS {
            let env_var = format!("{}_API_KEY", provider.to_uppercase());
            if let Ok(key) = std::env::var(&env_var) {
                self.providers
                    .entry((*provider).to_string())
                    .or_default()
                    .env_api_key = Some(key);
            }
        }
        let ollama_base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:11434".to_string());
        let ollama = self.providers.entry("ollama".to_string()).or_default();
        if ollama.base_url.is_none() {
            ollama.base_url = Some(ollama_base_url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_name_is_rejected() {
        let mut providers = HashMap::new();
        providers.insert("not-a-provider".to_string(), ProviderSettings::default());
        let config = GatewayConfig {
            data_dir: PathBuf::from("/tmp"),
            pool: PoolConfig::default(),
            resilience: ResilienceConfig::default(),
            providers,
            audit_log: AuditLogConfig::default(),
        };
        assert!(matches!(config.validate(), Err(ConfigError::UnknownProvider(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults_rooted_at_data_dir() {
        let data_dir = PathBuf::from("/tmp/theo-nonexistent-config-test");
        let config = GatewayConfig::load(Path::new("/tmp/does-not-exist.toml"), data_dir.clone())
            .unwrap();
        assert_eq!(config.data_dir, data_dir);
        assert_eq!(config.pool, PoolConfig::default());
    }

    #[test]
    fn ollama_base_url_defaults_when_env_unset() {
        // SAFETY: tests in this module do not run concurrently with env mutation elsewhere.
        unsafe {
            std::env::remove_var("OLLAMA_BASE_URL");
        }
        let mut config = GatewayConfig {
            data_dir: PathBuf::from("/tmp"),
            pool: PoolConfig::default(),
            resilience: ResilienceConfig::default(),
            providers: HashMap::new(),
            audit_log: AuditLogConfig::default(),
        };
        config.apply_env_overrides();
        assert_eq!(
            config.providers.get("ollama").unwrap().base_url.as_deref(),
            Some("http://localhost:11434")
        );
    }
}

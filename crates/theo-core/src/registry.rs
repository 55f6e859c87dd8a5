//! Explicit, constructed-once registry of provider adapter factories.
//!
//! An ordinary struct built once at startup from `GatewayConfig` and handed
//! down to callers; there is no global mutable singleton here.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::ProviderAdapter;

/// A constructor for a provider's adapter, closed over whatever credential
/// and HTTP client the caller already resolved.
pub type AdapterFactory =
    Arc<dyn Fn(AdapterBuildArgs) -> Result<Arc<dyn ProviderAdapter>, String> + Send + Sync>;

/// Arguments common to every adapter constructor.
#[derive(Debug, Clone)]
pub struct AdapterBuildArgs {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: impl Into<String>, factory: AdapterFactory) {
        self.factories.insert(provider.into(), factory);
    }

    pub fn get(&self, provider: &str) -> Option<&AdapterFactory> {
        self.factories.get(provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }

    pub fn build(
        &self,
        provider: &str,
        args: AdapterBuildArgs,
    ) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        let factory = self
            .factories
            .get(provider)
            .ok_or_else(|| RegistryError::UnknownProvider(provider.to_string()))?;
        factory(args).map_err(RegistryError::BuildFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("failed to build adapter: {0}")]
    BuildFailed(String),
}

//! Shared data model, adapter trait, provider registry, configuration and
//! audit trail for the Theo model gateway.
//!
//! This crate has no network, filesystem-beyond-config, or OAuth concerns of
//! its own — those live in `theo-pool`, `theo-auth` and `theo-session`. It is
//! the vocabulary every other crate in the workspace shares.

pub mod adapter;
pub mod audit;
pub mod config;
pub mod error;
pub mod message;
pub mod registry;
pub mod stream;
pub mod tokencount;
pub mod tool;

pub use adapter::{ChunkStream, GenerateOptions, ProviderAdapter};
pub use audit::{AuditError, AuditLevel, AuditLogger, AuditRecord, AuditResult};
pub use config::{
    ConfigError, GatewayConfig, OAuthConfig, PoolConfig, PreferredAuthMethod, ProviderSettings,
    ResilienceConfig, AuditLogConfig, KNOWN_PROVIDERS,
};
pub use error::{ErrorMetadata, GatewayError, RecoveryStrategy, Severity};
pub use message::{Content, ContentBlock, Message, MessageError, Role, ToolResultRef};
pub use registry::{AdapterBuildArgs, AdapterFactory, ProviderRegistry, RegistryError};
pub use stream::{validate_stream_shape, ErrorCode, StreamChunk, StreamShapeError, Usage};
pub use tokencount::{TokenCountCache, DEFAULT_CAPACITY};
pub use tool::{ToolCall, ToolDefinitionError, ToolParameters, UniversalToolDefinition};

//! Durable, atomically-written conversation session storage.

pub mod envelope;
pub mod failure;
pub mod index;
pub mod migration;
pub mod model;
pub mod recovery;
pub mod store;

pub use envelope::{EnvelopeError, SessionEnvelope};
pub use failure::{
    classify_error, recovery_options, EscalationPolicy, ErrorType, FailureEntry, FailureRecord,
    RecoveryOption, RecoveryRecommendation,
};
pub use index::{cleanup_orphaned_entries, index_path, validate, SessionIndex, ValidationReport};
pub use migration::{migrate, MigrationError, MigrationResult, SUPPORTED_VERSIONS};
pub use model::{Session, SessionMetadata, SessionValidationError, TokenCount, CURRENT_SCHEMA_VERSION};
pub use recovery::{RestoreOutcome, SessionRecoveryCoordinator};
pub use store::{FileSessionStore, SessionStore, SessionStoreError};

//! Error types for registry operations.

use nexus_types::DatabaseKey;
use thiserror::Error;

/// Errors that can occur while opening databases or resolving collections.
///
/// Errors are `Clone` so one failed attempt can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The driver could not open the database.
    #[error("connection to {database} database ({name}) failed: {reason}")]
    ConnectionFailure {
        database: DatabaseKey,
        name: String,
        reason: String,
    },

    /// The database is open but the collection could not be resolved.
    #[error("collection {collection} on {database} database unavailable: {reason}")]
    CollectionAccess {
        database: DatabaseKey,
        collection: String,
        reason: String,
    },

    /// The attempt did not finish within its deadline.
    #[error("{target} timed out after {after_ms}ms")]
    Timeout { target: String, after_ms: u64 },
}

impl RegistryError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionFailure { .. } | Self::Timeout { .. })
    }
}

/// Convenience type alias for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

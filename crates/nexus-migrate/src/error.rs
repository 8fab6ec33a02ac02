use nexus_registry::RegistryError;

/// Errors that can occur while enforcing schemas or linking relations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrateError {
    /// The bulk patch over a collection failed.
    #[error("schema enforcement on {collection} failed: {reason}")]
    SchemaEnforcement { collection: String, reason: String },

    /// The organization users are linked to does not exist.
    #[error("sentinel organization {name:?} not found")]
    MissingSentinel { name: String },

    /// Reading the organization or patching users failed.
    #[error("linking users to {org:?} failed: {reason}")]
    Relation { org: String, reason: String },

    /// A patch or lookup exceeded the query timeout.
    #[error("{operation} on {collection} timed out after {after_ms}ms")]
    Timeout {
        operation: String,
        collection: String,
        after_ms: u64,
    },

    /// The collection could not be obtained.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl MigrateError {
    /// Whether re-running the failed step may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Registry(e) => e.is_transient(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Whether the failure was already written to the state log where it
    /// happened. Registry failures are recorded by the registry itself.
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Registry(_))
    }
}

/// Convenience type alias for migration operations.
pub type MigrateResult<T> = std::result::Result<T, MigrateError>;

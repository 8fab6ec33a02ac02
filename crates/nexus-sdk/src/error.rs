use nexus_migrate::MigrateError;
use nexus_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NexusError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("migration step {step} failed: {source}")]
    Migration {
        step: String,
        #[source]
        source: MigrateError,
    },
}

impl NexusError {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Registry(e) => e.is_transient(),
            Self::Migration { source, .. } => source.is_transient(),
        }
    }
}

pub type NexusResult<T> = Result<T, NexusError>;

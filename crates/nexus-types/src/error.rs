use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid collection name {name:?}: {reason}")]
    InvalidCollectionName { name: String, reason: String },

    #[error("invalid database name {name:?}: {reason}")]
    InvalidDatabaseName { name: String, reason: String },

    #[error("invalid document id: {0}")]
    InvalidDocumentId(String),

    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("serialization error: {0}")]
    Serialization(String),
}

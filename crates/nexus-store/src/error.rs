use nexus_types::TypeError;
use serde_json::Value;

/// Errors from driver operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The driver could not open the named database.
    #[error("cannot connect to database {database}: {reason}")]
    ConnectionRefused { database: String, reason: String },

    /// The connection could not resolve the named collection.
    #[error("cannot open collection {database}.{collection}: {reason}")]
    CollectionUnavailable {
        database: String,
        collection: String,
        reason: String,
    },

    /// A patch operation could not be applied to a document.
    #[error("patch rejected at {path}: {reason}")]
    PatchRejected { path: String, reason: String },

    /// A document with this id already exists.
    #[error("duplicate document id: {0}")]
    DuplicateId(Value),

    /// The document is malformed.
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] TypeError),
}

/// Result alias for driver operations.
pub type StoreResult<T> = Result<T, StoreError>;

use std::sync::Arc;

use async_trait::async_trait;
use nexus_types::{CollectionName, Document};
use serde_json::Value;

use crate::error::StoreResult;
use crate::patch::{Filter, PatchOp, PatchOptions, PatchOutcome};

/// Entry point of a database driver.
///
/// Implementations must be thread-safe (`Send + Sync`). Connecting is the
/// only operation that may reach the network to establish state; everything
/// else goes through the returned [`Connection`].
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Open a connection to the database with the given physical name.
    async fn connect(&self, database: &str) -> StoreResult<Arc<dyn Connection>>;
}

/// An open connection to one database.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Physical name of the database this connection is bound to.
    fn database(&self) -> &str;

    /// Resolve a collection on this database.
    ///
    /// Resolving a collection that holds no documents yet is not an error.
    async fn collection(&self, name: &CollectionName) -> StoreResult<Arc<dyn DocumentCollection>>;
}

/// A named grouping of documents.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Name of this collection.
    fn name(&self) -> &CollectionName;

    /// Apply `ops` to every document matching `filter`.
    ///
    /// With `insert_if_none_match`, a new document is inserted when nothing
    /// matches. It is built from the filter's equality clauses, then `ops`
    /// are applied to it.
    async fn patch_many(
        &self,
        filter: &Filter,
        ops: &[PatchOp],
        options: PatchOptions,
    ) -> StoreResult<PatchOutcome>;

    /// Return the first document matching `filter`, in insertion order.
    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>>;

    /// Return every document matching `filter`, in insertion order.
    async fn find(&self, filter: &Filter) -> StoreResult<Vec<Document>>;

    /// Insert a document, assigning an `_id` when it has none. Returns the
    /// stored `_id`, which is kept as given when the document carries one.
    async fn insert_one(&self, document: Document) -> StoreResult<Value>;

    /// Count documents matching `filter`.
    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        Ok(self.find(filter).await?.len() as u64)
    }

    /// Apply `ops` to every document in the collection.
    ///
    /// Against the empty filter "none match" means the collection is empty,
    /// so `insert_if_none_match` can only ever seed an empty collection.
    async fn patch_all(&self, ops: &[PatchOp], options: PatchOptions) -> StoreResult<PatchOutcome> {
        self.patch_many(&Filter::all(), ops, options).await
    }
}

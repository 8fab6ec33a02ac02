use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use nexus_types::{CollectionName, Document};
use serde_json::Value;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::patch::{apply_ops, seed_from_filter, Filter, PatchOp, PatchOptions, PatchOutcome};
use crate::traits::{Connection, DatabaseDriver, DocumentCollection};

/// Injected connect failure for one database name.
#[derive(Clone, Debug)]
struct ConnectFault {
    reason: String,
    /// `None` fails forever; `Some(n)` fails the next `n` attempts.
    remaining: Option<usize>,
}

/// In-memory, HashMap-based database driver.
///
/// Intended for tests, previews, and embedding. Every `connect` to the same
/// name returns the same [`InMemoryDatabase`], so data written through one
/// connection is visible through any other, as with a real server.
///
/// The driver counts connect and collection calls and can inject connect
/// latency and failures, which is what the registry's single-flight tests
/// observe.
pub struct InMemoryDriver {
    databases: RwLock<HashMap<String, Arc<InMemoryDatabase>>>,
    connect_faults: RwLock<HashMap<String, ConnectFault>>,
    connect_latency: RwLock<Duration>,
    connect_calls: AtomicUsize,
}

impl InMemoryDriver {
    /// Create a driver with no databases.
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            connect_faults: RwLock::new(HashMap::new()),
            connect_latency: RwLock::new(Duration::ZERO),
            connect_calls: AtomicUsize::new(0),
        }
    }

    /// Delay every `connect` by `latency`.
    pub fn with_connect_latency(self, latency: Duration) -> Self {
        self.set_connect_latency(latency);
        self
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        *self.connect_latency.write().expect("lock poisoned") = latency;
    }

    /// Make every `connect(database)` fail with `reason`.
    pub fn fail_connect(&self, database: impl Into<String>, reason: impl Into<String>) {
        self.connect_faults.write().expect("lock poisoned").insert(
            database.into(),
            ConnectFault {
                reason: reason.into(),
                remaining: None,
            },
        );
    }

    /// Make the next `attempts` calls to `connect(database)` fail.
    pub fn fail_next_connects(
        &self,
        database: impl Into<String>,
        attempts: usize,
        reason: impl Into<String>,
    ) {
        self.connect_faults.write().expect("lock poisoned").insert(
            database.into(),
            ConnectFault {
                reason: reason.into(),
                remaining: Some(attempts),
            },
        );
    }

    /// Remove all injected connect failures.
    pub fn clear_faults(&self) {
        self.connect_faults.write().expect("lock poisoned").clear();
    }

    /// Number of `connect` calls so far, failed ones included.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Direct access to a database, creating it if needed.
    ///
    /// Does not count as a connect; used to seed and inspect data.
    pub fn database(&self, name: &str) -> Arc<InMemoryDatabase> {
        let mut map = self.databases.write().expect("lock poisoned");
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(InMemoryDatabase::new(name))),
        )
    }

    /// Names of every database that exists, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let map = self.databases.read().expect("lock poisoned");
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    fn take_fault(&self, database: &str) -> Option<String> {
        let mut faults = self.connect_faults.write().expect("lock poisoned");
        let fault = faults.get_mut(database)?;
        let reason = fault.reason.clone();
        match fault.remaining.as_mut() {
            None => Some(reason),
            Some(0) => {
                faults.remove(database);
                None
            }
            Some(n) => {
                *n -= 1;
                if *n == 0 {
                    faults.remove(database);
                }
                Some(reason)
            }
        }
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDriver")
            .field("databases", &self.database_names())
            .field("connect_calls", &self.connect_calls())
            .finish()
    }
}

#[async_trait]
impl DatabaseDriver for InMemoryDriver {
    async fn connect(&self, database: &str) -> StoreResult<Arc<dyn Connection>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.connect_latency.read().expect("lock poisoned");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(reason) = self.take_fault(database) {
            return Err(StoreError::ConnectionRefused {
                database: database.to_string(),
                reason,
            });
        }

        debug!(database, "in-memory connect");
        let db: Arc<dyn Connection> = self.database(database);
        Ok(db)
    }
}

/// One in-memory database: a set of named collections.
pub struct InMemoryDatabase {
    name: String,
    collections: RwLock<HashMap<CollectionName, Arc<InMemoryCollection>>>,
    unavailable: RwLock<HashMap<CollectionName, String>>,
}

impl InMemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
            unavailable: RwLock::new(HashMap::new()),
        }
    }

    /// Direct access to a collection, creating it if needed.
    pub fn collection_handle(&self, name: &CollectionName) -> Arc<InMemoryCollection> {
        let mut map = self.collections.write().expect("lock poisoned");
        Arc::clone(
            map.entry(name.clone())
                .or_insert_with(|| Arc::new(InMemoryCollection::new(name.clone()))),
        )
    }

    /// Make resolving `name` fail with `reason`.
    pub fn make_unavailable(&self, name: &CollectionName, reason: impl Into<String>) {
        self.unavailable
            .write()
            .expect("lock poisoned")
            .insert(name.clone(), reason.into());
    }

    /// Names of every collection that exists, sorted.
    pub fn collection_names(&self) -> Vec<CollectionName> {
        let map = self.collections.read().expect("lock poisoned");
        let mut names: Vec<CollectionName> = map.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Connection for InMemoryDatabase {
    fn database(&self) -> &str {
        &self.name
    }

    async fn collection(&self, name: &CollectionName) -> StoreResult<Arc<dyn DocumentCollection>> {
        if let Some(reason) = self.unavailable.read().expect("lock poisoned").get(name) {
            return Err(StoreError::CollectionUnavailable {
                database: self.name.clone(),
                collection: name.to_string(),
                reason: reason.clone(),
            });
        }
        let collection: Arc<dyn DocumentCollection> = self.collection_handle(name);
        Ok(collection)
    }
}

impl std::fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDatabase")
            .field("name", &self.name)
            .field("collections", &self.collection_names())
            .finish()
    }
}

/// One in-memory collection. Documents are kept in insertion order.
pub struct InMemoryCollection {
    name: CollectionName,
    documents: RwLock<Vec<Document>>,
    patch_calls: AtomicUsize,
}

impl InMemoryCollection {
    pub fn new(name: CollectionName) -> Self {
        Self {
            name,
            documents: RwLock::new(Vec::new()),
            patch_calls: AtomicUsize::new(0),
        }
    }

    /// Snapshot of every document, in insertion order.
    pub fn documents(&self) -> Vec<Document> {
        self.documents.read().expect("lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.documents.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bulk patch calls so far.
    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }

    /// Remove every document.
    pub fn clear(&self) {
        self.documents.write().expect("lock poisoned").clear();
    }
}

#[async_trait]
impl DocumentCollection for InMemoryCollection {
    fn name(&self) -> &CollectionName {
        &self.name
    }

    async fn patch_many(
        &self,
        filter: &Filter,
        ops: &[PatchOp],
        options: PatchOptions,
    ) -> StoreResult<PatchOutcome> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        let mut docs = self.documents.write().expect("lock poisoned");

        // Patch copies first so a rejected op leaves the collection untouched.
        let mut patched: Vec<(usize, Document)> = Vec::new();
        let mut matched = 0u64;
        for (index, doc) in docs.iter().enumerate() {
            if !filter.matches(doc) {
                continue;
            }
            matched += 1;
            let mut copy = doc.clone();
            if apply_ops(&mut copy, ops)? {
                patched.push((index, copy));
            }
        }

        let modified = patched.len() as u64;
        for (index, doc) in patched {
            docs[index] = doc;
        }

        let mut inserted = None;
        if matched == 0 && options.insert_if_none_match {
            let mut seed = seed_from_filter(filter)?;
            apply_ops(&mut seed, ops)?;
            let id = seed.ensure_id();
            docs.push(seed);
            inserted = Some(id);
        }

        debug!(collection = %self.name, matched, modified, inserted = inserted.is_some(), "patch applied");
        Ok(PatchOutcome {
            matched,
            modified,
            inserted,
        })
    }

    async fn find_one(&self, filter: &Filter) -> StoreResult<Option<Document>> {
        let docs = self.documents.read().expect("lock poisoned");
        Ok(docs.iter().find(|d| filter.matches(d)).cloned())
    }

    async fn find(&self, filter: &Filter) -> StoreResult<Vec<Document>> {
        let docs = self.documents.read().expect("lock poisoned");
        Ok(docs.iter().filter(|d| filter.matches(d)).cloned().collect())
    }

    async fn insert_one(&self, mut document: Document) -> StoreResult<Value> {
        let id = document.ensure_id();
        let mut docs = self.documents.write().expect("lock poisoned");
        if docs.iter().any(|d| d.id_value() == Some(&id)) {
            return Err(StoreError::DuplicateId(id));
        }
        docs.push(document);
        Ok(id)
    }

    async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        let docs = self.documents.read().expect("lock poisoned");
        Ok(docs.iter().filter(|d| filter.matches(d)).count() as u64)
    }
}

impl std::fmt::Debug for InMemoryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCollection")
            .field("name", &self.name)
            .field("document_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn users() -> CollectionName {
        CollectionName::users()
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn connect_returns_shared_database() {
        let driver = InMemoryDriver::new();
        let a = driver.connect("nexus").await.unwrap();
        let b = driver.connect("nexus").await.unwrap();
        assert_eq!(a.database(), "nexus");
        assert_eq!(driver.connect_calls(), 2);

        let coll = a.collection(&users()).await.unwrap();
        coll.insert_one(doc(json!({"n": 1}))).await.unwrap();

        let through_b = b.collection(&users()).await.unwrap();
        assert_eq!(through_b.count(&Filter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn injected_failure_is_permanent_until_cleared() {
        let driver = InMemoryDriver::new();
        driver.fail_connect("nexus", "refused");
        for _ in 0..3 {
            let err = driver.connect("nexus").await.err().unwrap();
            assert!(matches!(err, StoreError::ConnectionRefused { .. }));
        }
        driver.clear_faults();
        assert!(driver.connect("nexus").await.is_ok());
    }

    #[tokio::test]
    async fn fail_next_connects_counts_down() {
        let driver = InMemoryDriver::new();
        driver.fail_next_connects("nexus", 2, "flaky");
        assert!(driver.connect("nexus").await.is_err());
        assert!(driver.connect("nexus").await.is_err());
        assert!(driver.connect("nexus").await.is_ok());
        assert_eq!(driver.connect_calls(), 3);
    }

    #[tokio::test]
    async fn faults_are_per_database() {
        let driver = InMemoryDriver::new();
        driver.fail_connect("organizations", "down");
        assert!(driver.connect("nexus").await.is_ok());
        assert!(driver.connect("organizations").await.is_err());
    }

    #[tokio::test]
    async fn unavailable_collection_errors() {
        let driver = InMemoryDriver::new();
        let db = driver.database("nexus");
        db.make_unavailable(&users(), "locked");
        let conn = driver.connect("nexus").await.unwrap();
        let err = conn.collection(&users()).await.err().unwrap();
        assert!(matches!(err, StoreError::CollectionUnavailable { .. }));
    }

    // -----------------------------------------------------------------------
    // Collection
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn insert_assigns_id_and_rejects_duplicates() {
        let coll = InMemoryCollection::new(users());
        let id = coll.insert_one(doc(json!({}))).await.unwrap();
        let stored = coll.find_one(&Filter::all()).await.unwrap().unwrap();
        assert_eq!(stored.id_value(), Some(&id));
        assert!(stored.id().is_some());

        let dup = doc(json!({"_id": id.clone()}));
        assert_eq!(coll.insert_one(dup).await, Err(StoreError::DuplicateId(id)));
    }

    #[tokio::test]
    async fn insert_keeps_foreign_ids() {
        let coll = InMemoryCollection::new(CollectionName::organizations());
        let object_id = json!("65a1f0c2e4b0a1b2c3d4e5f6");
        let id = coll
            .insert_one(doc(json!({"_id": object_id.clone(), "name": "demo"})))
            .await
            .unwrap();
        assert_eq!(id, object_id);

        let stored = coll.find_one(&Filter::eq("name", "demo")).await.unwrap().unwrap();
        assert_eq!(stored.get("_id"), Some(&object_id));
    }

    #[tokio::test]
    async fn patch_all_touches_every_document() {
        let coll = InMemoryCollection::new(users());
        coll.insert_one(doc(json!({}))).await.unwrap();
        coll.insert_one(doc(json!({"organizations": ["x"]}))).await.unwrap();

        let outcome = coll
            .patch_all(&[PatchOp::set_if_absent("organizations", json!([]))], PatchOptions::upsert())
            .await
            .unwrap();
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.modified, 1);
        assert!(outcome.inserted.is_none());

        let docs = coll.documents();
        assert_eq!(docs[0].get("organizations"), Some(&json!([])));
        assert_eq!(docs[1].get("organizations"), Some(&json!(["x"])));
    }

    #[tokio::test]
    async fn insert_if_none_match_seeds_empty_collection() {
        let coll = InMemoryCollection::new(CollectionName::organizations());
        let outcome = coll
            .patch_all(&[PatchOp::set_if_absent("name", "demo")], PatchOptions::upsert())
            .await
            .unwrap();
        assert_eq!(outcome.matched, 0);
        let id = outcome.inserted.expect("seeded");
        let docs = coll.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id_value(), Some(&id));
        assert_eq!(docs[0].get("name"), Some(&json!("demo")));
    }

    #[tokio::test]
    async fn update_only_leaves_empty_collection_empty() {
        let coll = InMemoryCollection::new(users());
        let outcome = coll
            .patch_all(&[PatchOp::set_if_absent("x", 1)], PatchOptions::update_only())
            .await
            .unwrap();
        assert_eq!(outcome, PatchOutcome::default());
        assert!(coll.is_empty());
    }

    #[tokio::test]
    async fn upsert_with_filter_seeds_filter_fields() {
        let coll = InMemoryCollection::new(CollectionName::organizations());
        coll.insert_one(doc(json!({"name": "other"}))).await.unwrap();
        let outcome = coll
            .patch_many(
                &Filter::eq("name", "demo"),
                &[PatchOp::set_if_absent("members", json!([]))],
                PatchOptions::upsert(),
            )
            .await
            .unwrap();
        assert!(outcome.inserted.is_some());
        let demo = coll.find_one(&Filter::eq("name", "demo")).await.unwrap().unwrap();
        assert_eq!(demo.get("members"), Some(&json!([])));
    }

    #[tokio::test]
    async fn rejected_patch_changes_nothing() {
        let coll = InMemoryCollection::new(users());
        coll.insert_one(doc(json!({"organizations": []}))).await.unwrap();
        coll.insert_one(doc(json!({"organizations": "broken"}))).await.unwrap();
        let before = coll.documents();

        let result = coll
            .patch_all(&[PatchOp::add_to_set("organizations", "org")], PatchOptions::update_only())
            .await;
        assert!(matches!(result, Err(StoreError::PatchRejected { .. })));
        assert_eq!(coll.documents(), before);
    }

    #[tokio::test]
    async fn find_respects_filter_and_order() {
        let coll = InMemoryCollection::new(CollectionName::organizations());
        coll.insert_one(doc(json!({"name": "demo", "n": 1}))).await.unwrap();
        coll.insert_one(doc(json!({"name": "acme"}))).await.unwrap();
        coll.insert_one(doc(json!({"name": "demo", "n": 2}))).await.unwrap();

        let demos = coll.find(&Filter::eq("name", "demo")).await.unwrap();
        assert_eq!(demos.len(), 2);
        let first = coll.find_one(&Filter::eq("name", "demo")).await.unwrap().unwrap();
        assert_eq!(first.get("n"), Some(&json!(1)));
        assert_eq!(coll.count(&Filter::eq("name", "acme")).await.unwrap(), 1);
        assert!(coll.find_one(&Filter::eq("name", "none")).await.unwrap().is_none());
    }

    #[test]
    fn debug_format() {
        let driver = InMemoryDriver::new();
        driver.database("nexus");
        let debug = format!("{driver:?}");
        assert!(debug.contains("InMemoryDriver"));
        assert!(debug.contains("nexus"));
    }
}

use std::sync::Arc;
use std::time::Duration;

use nexus_statelog::{status, StateLog, StatePatch};
use nexus_store::{PatchOp, PatchOptions};
use nexus_types::{CanonicalShape, Document, ID_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{MigrateError, MigrateResult};
use crate::provider::{bounded, guarded, CollectionProvider};

/// What one enforcement pass did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnforceReport {
    /// `database|collection` that was patched.
    pub collection: String,
    /// Number of leaf fields in the enforced shape.
    pub fields: usize,
    pub matched: u64,
    pub modified: u64,
    /// `_id` of the document seeded into an empty collection, if any.
    pub inserted: Option<Value>,
}

/// Flatten a canonical shape into one `SetIfAbsent` per leaf field.
///
/// Non-empty objects are descended into; everything else (arrays, scalars,
/// empty objects) is a leaf. `_id` is never part of a shape.
pub fn leaf_ops(shape: &Document) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    for (key, value) in shape.as_map() {
        if key == ID_FIELD {
            continue;
        }
        flatten(key.clone(), value, &mut ops);
    }
    ops
}

fn flatten(path: String, value: &Value, ops: &mut Vec<PatchOp>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten(format!("{path}.{key}"), child, ops);
            }
        }
        _ => ops.push(PatchOp::set_if_absent(path, value.clone())),
    }
}

/// Brings every document in a collection up to a canonical shape.
///
/// Enforcement only fills in missing fields, so running it any number of
/// times leaves the collection as one run would.
pub struct SchemaEnforcer {
    log: Arc<StateLog>,
    query_timeout: Duration,
}

impl SchemaEnforcer {
    pub fn new(log: Arc<StateLog>, query_timeout: Duration) -> Self {
        Self { log, query_timeout }
    }

    /// Enforce the canonical instance of `S`.
    pub async fn enforce_shape<S: CanonicalShape>(
        &self,
        provider: &dyn CollectionProvider,
        options: PatchOptions,
    ) -> MigrateResult<EnforceReport> {
        let schema = S::canonical()
            .to_document()
            .map_err(|e| MigrateError::SchemaEnforcement {
                collection: provider.describe(),
                reason: e.to_string(),
            })?;
        self.enforce(&schema, provider, options).await
    }

    /// Patch every document of the provider's collection so it carries each
    /// leaf of `schema`, leaving fields that already exist untouched.
    ///
    /// With [`PatchOptions::upsert`] an empty collection receives one
    /// document built from `schema`.
    pub async fn enforce(
        &self,
        schema: &Document,
        provider: &dyn CollectionProvider,
        options: PatchOptions,
    ) -> MigrateResult<EnforceReport> {
        let target = provider.describe();
        self.log.update(
            StatePatch::new()
                .action("schema-enforcing")
                .verb("collection")
                .status(status::LOADING)
                .message(target.clone()),
        );

        let ops = leaf_ops(schema);
        let outcome = guarded(&self.log, async {
            let collection = provider.collection().await?;
            bounded(
                self.query_timeout,
                "schema patch",
                &target,
                collection.patch_all(&ops, options),
            )
            .await?
            .map_err(|e| MigrateError::SchemaEnforcement {
                collection: target.clone(),
                reason: e.to_string(),
            })
        })
        .await?;

        self.log.update(StatePatch::new().status(status::DONE).message(target.clone()));
        info!(
            collection = %target,
            matched = outcome.matched,
            modified = outcome.modified,
            seeded = outcome.inserted.is_some(),
            "schema enforced"
        );

        Ok(EnforceReport {
            collection: target,
            fields: ops.len(),
            matched: outcome.matched,
            modified: outcome.modified,
            inserted: outcome.inserted,
        })
    }
}

impl std::fmt::Debug for SchemaEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaEnforcer")
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FixedCollection, RegistryCollection};
    use nexus_registry::{ConnectionRegistry, RegistryConfig};
    use nexus_store::{DocumentCollection, InMemoryCollection, InMemoryDriver};
    use nexus_types::{CollectionName, DatabaseKey, OrgSchema, UserSchema};
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn enforcer(log: &Arc<StateLog>) -> SchemaEnforcer {
        SchemaEnforcer::new(Arc::clone(log), Duration::from_secs(1))
    }

    async fn collection_with(name: CollectionName, docs: Vec<Value>) -> Arc<InMemoryCollection> {
        let collection = Arc::new(InMemoryCollection::new(name));
        for d in docs {
            collection.insert_one(doc(d)).await.unwrap();
        }
        collection
    }

    fn without_ids(collection: &InMemoryCollection) -> Vec<Value> {
        collection
            .documents()
            .into_iter()
            .map(|mut d| {
                d.as_map_mut().remove(ID_FIELD);
                d.into_value()
            })
            .collect()
    }

    // ---- leaf_ops ----

    #[test]
    fn user_shape_flattens_to_leaves() {
        let shape = UserSchema::canonical().to_document().unwrap();
        let paths: Vec<String> = leaf_ops(&shape).iter().map(|op| op.path().to_string()).collect();
        assert_eq!(paths, vec!["favorites.characters", "organizations"]);
    }

    #[test]
    fn org_shape_flattens_to_leaves() {
        let shape = OrgSchema::canonical().to_document().unwrap();
        let mut paths: Vec<String> = leaf_ops(&shape).iter().map(|op| op.path().to_string()).collect();
        paths.sort();
        assert_eq!(paths, vec!["members", "name", "rickmorty_meta.favorites.characters"]);
    }

    #[test]
    fn empty_object_and_id_handling() {
        let shape = doc(json!({"_id": "x", "meta": {}, "tags": []}));
        let ops = leaf_ops(&shape);
        assert_eq!(
            ops,
            vec![
                PatchOp::set_if_absent("meta", json!({})),
                PatchOp::set_if_absent("tags", json!([])),
            ]
        );
    }

    // ---- enforce ----

    #[tokio::test]
    async fn fills_missing_fields_only() {
        let log = Arc::new(StateLog::new());
        let users = collection_with(
            CollectionName::users(),
            vec![json!({}), json!({"favorites": {"characters": [1, 2]}, "email": "a@b.c"})],
        )
        .await;
        let provider = FixedCollection::new(users.clone());

        let report = enforcer(&log)
            .enforce_shape::<UserSchema>(&provider, PatchOptions::update_only())
            .await
            .unwrap();
        assert_eq!(report.matched, 2);
        assert_eq!(report.modified, 2);
        assert_eq!(report.fields, 2);
        assert_eq!(report.inserted, None);

        assert_eq!(
            without_ids(&users),
            vec![
                json!({"favorites": {"characters": []}, "organizations": []}),
                json!({"favorites": {"characters": [1, 2]}, "email": "a@b.c", "organizations": []}),
            ]
        );

        let cursor = log.cursor();
        assert_eq!(cursor.action.as_deref(), Some("schema-enforcing"));
        assert_eq!(cursor.verb.as_deref(), Some("collection"));
        assert_eq!(cursor.status.as_deref(), Some(status::DONE));
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let log = Arc::new(StateLog::new());
        let users = collection_with(CollectionName::users(), vec![json!({}), json!({"organizations": ["x"]})]).await;
        let provider = FixedCollection::new(users.clone());
        let enforcer = enforcer(&log);

        enforcer
            .enforce_shape::<UserSchema>(&provider, PatchOptions::update_only())
            .await
            .unwrap();
        let after_first = users.documents();

        let report = enforcer
            .enforce_shape::<UserSchema>(&provider, PatchOptions::update_only())
            .await
            .unwrap();
        assert_eq!(report.modified, 0);
        assert_eq!(users.documents(), after_first);
    }

    #[tokio::test]
    async fn upsert_seeds_empty_collection_once() {
        let log = Arc::new(StateLog::new());
        let orgs = collection_with(CollectionName::organizations(), vec![]).await;
        let provider = FixedCollection::new(orgs.clone());
        let enforcer = enforcer(&log);

        let report = enforcer
            .enforce_shape::<OrgSchema>(&provider, PatchOptions::upsert())
            .await
            .unwrap();
        assert!(report.inserted.is_some());
        assert_eq!(
            without_ids(&orgs),
            vec![json!({"name": "demo", "members": [], "rickmorty_meta": {"favorites": {"characters": []}}})]
        );

        let again = enforcer
            .enforce_shape::<OrgSchema>(&provider, PatchOptions::upsert())
            .await
            .unwrap();
        assert_eq!(again.inserted, None);
        assert_eq!(orgs.len(), 1);
    }

    #[tokio::test]
    async fn update_only_leaves_empty_collection_empty() {
        let log = Arc::new(StateLog::new());
        let users = collection_with(CollectionName::users(), vec![]).await;
        let report = enforcer(&log)
            .enforce_shape::<UserSchema>(&FixedCollection::new(users.clone()), PatchOptions::update_only())
            .await
            .unwrap();
        assert_eq!(report.matched, 0);
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn conflicting_field_is_recorded_and_nothing_changes() {
        let log = Arc::new(StateLog::new());
        let users = collection_with(
            CollectionName::users(),
            vec![json!({}), json!({"favorites": "everything"})],
        )
        .await;
        let before = users.documents();

        let err = enforcer(&log)
            .enforce_shape::<UserSchema>(&FixedCollection::new(users.clone()), PatchOptions::update_only())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SchemaEnforcement { .. }));
        assert!(!err.is_transient());
        assert_eq!(users.documents(), before);
        assert!(log.last_error().is_some());
    }

    #[tokio::test]
    async fn registry_failure_is_not_recorded_twice() {
        let log = Arc::new(StateLog::new());
        let driver = Arc::new(InMemoryDriver::new());
        driver.fail_connect("nexus", "refused");
        let registry = Arc::new(ConnectionRegistry::new(driver, Arc::clone(&log), RegistryConfig::default()));
        let provider = RegistryCollection::new(registry, DatabaseKey::Primary, UserSchema::collection());

        let err = enforcer(&log)
            .enforce_shape::<UserSchema>(&provider, PatchOptions::update_only())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Registry(_)));

        // The failed connect and the unavailable collection, nothing more.
        let errors: Vec<_> = log.entries().into_iter().filter(|e| e.is_error()).collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[1].message.as_deref(),
            Some("nexus|users: database unavailable")
        );
    }

    // ---- properties ----

    fn arb_user() -> impl Strategy<Value = Value> {
        let favorites = prop_oneof![
            Just(None),
            Just(Some(json!({}))),
            prop::collection::vec(0u64..500, 0..4).prop_map(|ids| Some(json!({"characters": ids}))),
        ];
        let organizations = prop_oneof![Just(None), Just(Some(json!([]))), Just(Some(json!(["org-1"])))];
        let extra = prop::option::of("[a-z]{1,8}");
        (favorites, organizations, extra).prop_map(|(favorites, organizations, extra)| {
            let mut doc = serde_json::Map::new();
            if let Some(f) = favorites {
                doc.insert("favorites".into(), f);
            }
            if let Some(o) = organizations {
                doc.insert("organizations".into(), o);
            }
            if let Some(e) = extra {
                doc.insert("email".into(), json!(e));
            }
            Value::Object(doc)
        })
    }

    proptest! {
        #[test]
        fn enforcing_twice_equals_enforcing_once(users in prop::collection::vec(arb_user(), 0..6)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let log = Arc::new(StateLog::new());
                let collection = collection_with(CollectionName::users(), users).await;
                let provider = FixedCollection::new(collection.clone());
                let enforcer = enforcer(&log);

                enforcer.enforce_shape::<UserSchema>(&provider, PatchOptions::update_only()).await.unwrap();
                let once = collection.documents();
                enforcer.enforce_shape::<UserSchema>(&provider, PatchOptions::update_only()).await.unwrap();
                assert_eq!(collection.documents(), once);

                for d in &once {
                    assert!(d.get_path("favorites.characters").is_some());
                    assert!(d.get("organizations").is_some());
                }
            });
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use nexus_statelog::{status, StateLog, StatePatch};
use nexus_store::DatabaseDriver;
use nexus_types::{CollectionName, DatabaseKey, DatabaseNames};
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::flight::SingleFlight;
use crate::handle::{CollectionHandle, DatabaseHandle};

/// Registry settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    pub names: DatabaseNames,
    /// Upper bound for one driver connect.
    pub connect_timeout: Duration,
    /// Upper bound for resolving one collection.
    pub query_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            names: DatabaseNames::default(),
            connect_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Lazily opened databases and collections, cached for the registry's
/// lifetime.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> nexus_registry::RegistryResult<()> {
/// use std::sync::Arc;
/// use nexus_registry::{ConnectionRegistry, RegistryConfig};
/// use nexus_statelog::StateLog;
/// use nexus_store::InMemoryDriver;
/// use nexus_types::{CollectionName, DatabaseKey};
///
/// let registry = ConnectionRegistry::new(
///     Arc::new(InMemoryDriver::new()),
///     Arc::new(StateLog::new()),
///     RegistryConfig::default(),
/// );
/// let users = registry
///     .collection(DatabaseKey::Primary, &CollectionName::users())
///     .await?;
/// assert_eq!(users.namespace(), "nexus|users");
/// # Ok(())
/// # }
/// ```
pub struct ConnectionRegistry {
    driver: Arc<dyn DatabaseDriver>,
    log: Arc<StateLog>,
    config: RegistryConfig,
    databases: SingleFlight<DatabaseKey, DatabaseHandle>,
    collections: SingleFlight<(DatabaseKey, CollectionName), CollectionHandle>,
}

impl ConnectionRegistry {
    pub fn new(driver: Arc<dyn DatabaseDriver>, log: Arc<StateLog>, config: RegistryConfig) -> Self {
        Self {
            driver,
            log,
            config,
            databases: SingleFlight::new(),
            collections: SingleFlight::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn state_log(&self) -> &Arc<StateLog> {
        &self.log
    }

    /// Physical name configured for `key`.
    pub fn database_name(&self, key: DatabaseKey) -> &str {
        self.config.names.resolve(key)
    }

    /// Return the open database for `key`, connecting on first use.
    pub async fn database(&self, key: DatabaseKey) -> RegistryResult<DatabaseHandle> {
        if let Some(handle) = self.databases.get(&key) {
            debug!(database = %key, "database cache hit");
            return Ok(handle);
        }

        let driver = Arc::clone(&self.driver);
        let log = Arc::clone(&self.log);
        let name = self.database_name(key).to_string();
        let timeout = self.config.connect_timeout;

        self.databases
            .get_or_try_init(key, move || async move {
                log.update(
                    StatePatch::new()
                        .action("init")
                        .verb("database")
                        .status(status::CONNECTING)
                        .message(name.clone()),
                );

                let attempt = async {
                    match tokio::time::timeout(timeout, driver.connect(&name)).await {
                        Ok(Ok(connection)) => Ok(connection),
                        Ok(Err(e)) => Err(RegistryError::ConnectionFailure {
                            database: key,
                            name: name.clone(),
                            reason: e.to_string(),
                        }),
                        Err(_) => Err(RegistryError::Timeout {
                            target: format!("connect to {name}"),
                            after_ms: timeout.as_millis() as u64,
                        }),
                    }
                };
                let connection = log.run_guarded(attempt).await?;

                log.update(StatePatch::new().status(status::LOADING).message(name.clone()));
                info!(database = %key, name = %name, "database connected");
                Ok::<_, RegistryError>(DatabaseHandle::new(key, name, connection))
            })
            .await
    }

    /// Return the collection `name` on database `key`, resolving on first use.
    ///
    /// A failed database lookup is returned before any collection work
    /// starts.
    pub async fn collection(
        &self,
        key: DatabaseKey,
        name: &CollectionName,
    ) -> RegistryResult<CollectionHandle> {
        let cache_key = (key, name.clone());
        if let Some(handle) = self.collections.get(&cache_key) {
            debug!(database = %key, collection = %name, "collection cache hit");
            return Ok(handle);
        }

        let database = match self.database(key).await {
            Ok(database) => database,
            Err(e) => {
                self.log.update(
                    StatePatch::failure(format!(
                        "{}|{name}: database unavailable",
                        self.database_name(key)
                    ))
                    .action("init")
                    .verb("collection"),
                );
                return Err(e);
            }
        };

        let log = Arc::clone(&self.log);
        let name = name.clone();
        let timeout = self.config.query_timeout;

        self.collections
            .get_or_try_init(cache_key, move || async move {
                let namespace = format!("{}|{}", database.name(), name);
                log.update(
                    StatePatch::new()
                        .action("init")
                        .verb("collection")
                        .status(status::LOADING)
                        .message(namespace.clone()),
                );

                let attempt = async {
                    match tokio::time::timeout(timeout, database.connection().collection(&name)).await {
                        Ok(Ok(collection)) => Ok(collection),
                        Ok(Err(e)) => Err(RegistryError::CollectionAccess {
                            database: key,
                            collection: name.to_string(),
                            reason: e.to_string(),
                        }),
                        Err(_) => Err(RegistryError::Timeout {
                            target: format!("resolve {namespace}"),
                            after_ms: timeout.as_millis() as u64,
                        }),
                    }
                };
                let collection = log.run_guarded(attempt).await?;

                log.update(StatePatch::new().status(status::READY).message(namespace.clone()));
                info!(database = %key, collection = %name, "collection ready");
                Ok::<_, RegistryError>(CollectionHandle::new(key, database.name(), name, collection))
            })
            .await
    }

    /// Whether `key` has an open, cached database.
    pub fn is_cached(&self, key: DatabaseKey) -> bool {
        self.databases.get(&key).is_some()
    }

    /// Keys of every cached database, in [`DatabaseKey::ALL`] order.
    pub fn cached_databases(&self) -> Vec<DatabaseKey> {
        DatabaseKey::ALL
            .iter()
            .copied()
            .filter(|key| self.is_cached(*key))
            .collect()
    }

    /// Whether the collection `name` on `key` is cached.
    pub fn is_collection_cached(&self, key: DatabaseKey, name: &CollectionName) -> bool {
        self.collections.get(&(key, name.clone())).is_some()
    }

    /// How many connect attempts the registry has started.
    pub fn connect_attempts(&self) -> u64 {
        self.databases.attempts_started()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.config)
            .field("cached_databases", &self.cached_databases())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_store::{DocumentCollection, Filter, InMemoryDriver};
    use nexus_types::Document;
    use serde_json::json;

    fn setup(driver: Arc<InMemoryDriver>) -> (Arc<ConnectionRegistry>, Arc<StateLog>) {
        let log = Arc::new(StateLog::new());
        let config = RegistryConfig {
            connect_timeout: Duration::from_millis(200),
            query_timeout: Duration::from_millis(200),
            ..RegistryConfig::default()
        };
        let registry = Arc::new(ConnectionRegistry::new(driver, Arc::clone(&log), config));
        (registry, log)
    }

    // ---- databases ----

    #[tokio::test]
    async fn database_connects_once_and_caches() {
        let driver = Arc::new(InMemoryDriver::new());
        let (registry, log) = setup(Arc::clone(&driver));

        let first = registry.database(DatabaseKey::Primary).await.unwrap();
        let second = registry.database(DatabaseKey::Primary).await.unwrap();
        assert_eq!(first.name(), "nexus");
        assert_eq!(second.key(), DatabaseKey::Primary);
        assert_eq!(driver.connect_calls(), 1);
        assert!(registry.is_cached(DatabaseKey::Primary));
        assert!(!registry.is_cached(DatabaseKey::Organizations));
        assert_eq!(registry.cached_databases(), vec![DatabaseKey::Primary]);

        let statuses: Vec<_> = log
            .entries()
            .into_iter()
            .filter_map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![status::CONNECTING, status::LOADING]);
    }

    #[tokio::test]
    async fn concurrent_first_calls_share_one_connect() {
        let driver = Arc::new(InMemoryDriver::new().with_connect_latency(Duration::from_millis(30)));
        let (registry, _log) = setup(Arc::clone(&driver));

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.database(DatabaseKey::Primary).await })
            })
            .collect();
        for task in tasks {
            let handle = task.await.unwrap().unwrap();
            assert_eq!(handle.name(), "nexus");
        }
        assert_eq!(driver.connect_calls(), 1);
        assert_eq!(registry.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_calls_share_one_failure() {
        let driver = Arc::new(InMemoryDriver::new().with_connect_latency(Duration::from_millis(30)));
        driver.fail_connect("nexus", "refused");
        let (registry, log) = setup(Arc::clone(&driver));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.database(DatabaseKey::Primary).await })
            })
            .collect();
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, RegistryError::ConnectionFailure { .. }));
        }
        assert_eq!(driver.connect_calls(), 1);
        let errors = log.entries().into_iter().filter(|e| e.is_error()).count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn failure_does_not_poison_the_cache() {
        let driver = Arc::new(InMemoryDriver::new());
        driver.fail_next_connects("nexus", 1, "refused");
        let (registry, log) = setup(Arc::clone(&driver));

        let err = registry.database(DatabaseKey::Primary).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!registry.is_cached(DatabaseKey::Primary));
        assert!(log.last_error().is_some());

        let handle = registry.database(DatabaseKey::Primary).await.unwrap();
        assert_eq!(handle.name(), "nexus");
        assert_eq!(driver.connect_calls(), 2);
    }

    #[tokio::test]
    async fn slow_connect_times_out_and_leaves_no_entry() {
        let driver = Arc::new(InMemoryDriver::new().with_connect_latency(Duration::from_millis(500)));
        let (registry, log) = setup(Arc::clone(&driver));

        let err = registry.database(DatabaseKey::Primary).await.unwrap_err();
        assert!(matches!(err, RegistryError::Timeout { after_ms: 200, .. }));
        assert!(!registry.is_cached(DatabaseKey::Primary));
        let last = log.last_error().unwrap();
        assert!(last.message.unwrap().contains("timed out"));

        driver.set_connect_latency(Duration::ZERO);
        registry.database(DatabaseKey::Primary).await.unwrap();
        assert!(registry.is_cached(DatabaseKey::Primary));
    }

    #[tokio::test]
    async fn cancelled_wait_still_caches_connect() {
        let driver = Arc::new(InMemoryDriver::new().with_connect_latency(Duration::from_millis(100)));
        let (registry, log) = setup(Arc::clone(&driver));

        let wait = tokio::time::timeout(Duration::from_millis(10), registry.database(DatabaseKey::Primary)).await;
        assert!(wait.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(registry.is_cached(DatabaseKey::Primary));
        assert!(log.last_error().is_none());
        assert_eq!(log.cursor().status.as_deref(), Some(status::LOADING));

        registry.database(DatabaseKey::Primary).await.unwrap();
        assert_eq!(driver.connect_calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_wait_still_records_failure() {
        let driver = Arc::new(InMemoryDriver::new().with_connect_latency(Duration::from_millis(100)));
        driver.fail_connect("nexus", "refused");
        let (registry, log) = setup(Arc::clone(&driver));

        let wait = tokio::time::timeout(Duration::from_millis(10), registry.database(DatabaseKey::Primary)).await;
        assert!(wait.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!registry.is_cached(DatabaseKey::Primary));
        let last = log.last_error().unwrap();
        assert!(last.message.unwrap().contains("refused"));

        // Nothing is left in flight, so the next call connects again.
        driver.clear_faults();
        registry.database(DatabaseKey::Primary).await.unwrap();
        assert_eq!(driver.connect_calls(), 2);
    }

    #[tokio::test]
    async fn databases_resolve_configured_names() {
        let driver = Arc::new(InMemoryDriver::new());
        let log = Arc::new(StateLog::new());
        let config = RegistryConfig {
            names: DatabaseNames {
                primary: "app".into(),
                organizations: "app-orgs".into(),
            },
            ..RegistryConfig::default()
        };
        let registry = ConnectionRegistry::new(Arc::clone(&driver) as Arc<dyn DatabaseDriver>, log, config);

        let orgs = registry.database(DatabaseKey::Organizations).await.unwrap();
        assert_eq!(orgs.name(), "app-orgs");
        assert_eq!(orgs.connection().database(), "app-orgs");
        assert_eq!(driver.database_names(), vec!["app-orgs".to_string()]);
    }

    // ---- collections ----

    #[tokio::test]
    async fn collection_resolves_and_caches() {
        let driver = Arc::new(InMemoryDriver::new());
        let (registry, log) = setup(Arc::clone(&driver));
        let users = CollectionName::users();

        let first = registry.collection(DatabaseKey::Primary, &users).await.unwrap();
        let second = registry.collection(DatabaseKey::Primary, &users).await.unwrap();
        assert!(first.same_collection(&second));
        assert_eq!(first.namespace(), "nexus|users");
        assert!(registry.is_collection_cached(DatabaseKey::Primary, &users));

        let cursor = log.cursor();
        assert_eq!(cursor.action.as_deref(), Some("init"));
        assert_eq!(cursor.verb.as_deref(), Some("collection"));
        assert_eq!(cursor.status.as_deref(), Some(status::READY));
        assert_eq!(cursor.message.as_deref(), Some("nexus|users"));
    }

    #[tokio::test]
    async fn concurrent_first_collection_calls_share_one_resolution() {
        let driver = Arc::new(InMemoryDriver::new().with_connect_latency(Duration::from_millis(30)));
        let (registry, log) = setup(Arc::clone(&driver));
        let users = CollectionName::users();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let users = users.clone();
                tokio::spawn(async move { registry.collection(DatabaseKey::Primary, &users).await })
            })
            .collect();
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }
        assert!(handles.iter().all(|h| h.same_collection(&handles[0])));
        assert_eq!(driver.connect_calls(), 1);

        let collection_entries: Vec<_> = log
            .entries()
            .into_iter()
            .filter(|e| e.verb.as_deref() == Some("collection"))
            .filter_map(|e| e.status)
            .collect();
        assert_eq!(collection_entries, vec![status::LOADING, status::READY]);
    }

    #[tokio::test]
    async fn collection_sees_driver_data() {
        let driver = Arc::new(InMemoryDriver::new());
        driver
            .database("nexus")
            .collection_handle(&CollectionName::users())
            .insert_one(Document::from_value(json!({"email": "a@b.c"})).unwrap())
            .await
            .unwrap();
        let (registry, _log) = setup(Arc::clone(&driver));

        let users = registry
            .collection(DatabaseKey::Primary, &CollectionName::users())
            .await
            .unwrap();
        let found = users
            .collection()
            .find_one(&Filter::eq("email", "a@b.c"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn collection_fails_when_database_fails() {
        let driver = Arc::new(InMemoryDriver::new());
        driver.fail_connect("nexus", "refused");
        let (registry, log) = setup(Arc::clone(&driver));

        let err = registry
            .collection(DatabaseKey::Primary, &CollectionName::users())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ConnectionFailure { .. }));
        assert!(!registry.is_collection_cached(DatabaseKey::Primary, &CollectionName::users()));

        let last = log.last_error().unwrap();
        assert_eq!(last.verb.as_deref(), Some("collection"));
        assert_eq!(last.message.as_deref(), Some("nexus|users: database unavailable"));
    }

    #[tokio::test]
    async fn unavailable_collection_is_recorded_and_retried() {
        let driver = Arc::new(InMemoryDriver::new());
        let db = driver.database("nexus");
        db.make_unavailable(&CollectionName::users(), "locked");
        let (registry, log) = setup(Arc::clone(&driver));

        let err = registry
            .collection(DatabaseKey::Primary, &CollectionName::users())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::CollectionAccess { .. }));
        assert!(!err.is_transient());
        assert!(log.last_error().is_some());
        // The database itself stays cached.
        assert!(registry.is_cached(DatabaseKey::Primary));

        let orgs = registry
            .collection(DatabaseKey::Primary, &CollectionName::organizations())
            .await
            .unwrap();
        assert_eq!(orgs.name(), &CollectionName::organizations());
        assert_eq!(driver.connect_calls(), 1);
    }

    #[tokio::test]
    async fn same_collection_name_differs_per_database() {
        let driver = Arc::new(InMemoryDriver::new());
        let (registry, _log) = setup(Arc::clone(&driver));
        let orgs = CollectionName::organizations();

        let primary = registry.collection(DatabaseKey::Primary, &orgs).await.unwrap();
        let secondary = registry.collection(DatabaseKey::Organizations, &orgs).await.unwrap();
        assert!(!primary.same_collection(&secondary));
        assert_eq!(secondary.database(), DatabaseKey::Organizations);
        assert_eq!(secondary.database_name(), "organizations");
        assert_eq!(driver.connect_calls(), 2);
    }
}

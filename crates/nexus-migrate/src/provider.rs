use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus_registry::ConnectionRegistry;
use nexus_statelog::StateLog;
use nexus_store::{DocumentCollection, StoreResult};
use nexus_types::{CollectionName, DatabaseKey};

use crate::error::{MigrateError, MigrateResult};

/// Where a migration gets its collection from.
///
/// Migrations resolve their collection at run time rather than holding a
/// handle, so a step that runs after a failed connect retries the lookup.
#[async_trait]
pub trait CollectionProvider: Send + Sync {
    /// `database|collection`, used in log messages and errors.
    fn describe(&self) -> String;

    async fn collection(&self) -> MigrateResult<Arc<dyn DocumentCollection>>;
}

/// A collection looked up through the [`ConnectionRegistry`].
pub struct RegistryCollection {
    registry: Arc<ConnectionRegistry>,
    database: DatabaseKey,
    name: CollectionName,
}

impl RegistryCollection {
    pub fn new(registry: Arc<ConnectionRegistry>, database: DatabaseKey, name: CollectionName) -> Self {
        Self {
            registry,
            database,
            name,
        }
    }
}

#[async_trait]
impl CollectionProvider for RegistryCollection {
    fn describe(&self) -> String {
        format!("{}|{}", self.registry.database_name(self.database), self.name)
    }

    async fn collection(&self) -> MigrateResult<Arc<dyn DocumentCollection>> {
        let handle = self.registry.collection(self.database, &self.name).await?;
        Ok(Arc::clone(handle.collection()))
    }
}

/// An already-resolved collection.
pub struct FixedCollection {
    label: String,
    inner: Arc<dyn DocumentCollection>,
}

impl FixedCollection {
    pub fn new(inner: Arc<dyn DocumentCollection>) -> Self {
        Self {
            label: inner.name().to_string(),
            inner,
        }
    }
}

#[async_trait]
impl CollectionProvider for FixedCollection {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn collection(&self) -> MigrateResult<Arc<dyn DocumentCollection>> {
        Ok(Arc::clone(&self.inner))
    }
}

/// Await `operation`, writing a failure to `log` unless it was already
/// recorded upstream.
pub(crate) async fn guarded<T, F>(log: &StateLog, operation: F) -> MigrateResult<T>
where
    F: Future<Output = MigrateResult<T>>,
{
    let result = operation.await;
    if let Err(e) = &result {
        if !e.is_recorded() {
            log.record_failure(e.to_string());
        }
    }
    result
}

/// Bound a driver call by `limit`, mapping an elapsed deadline to
/// [`MigrateError::Timeout`]. The driver's own result is passed through.
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    operation: &str,
    collection: &str,
    call: F,
) -> MigrateResult<StoreResult<T>>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| MigrateError::Timeout {
            operation: operation.to_string(),
            collection: collection.to_string(),
            after_ms: limit.as_millis() as u64,
        })
}

use std::fmt;
use std::sync::Arc;

use nexus_store::{Connection, DocumentCollection};
use nexus_types::{CollectionName, DatabaseKey};

/// A cached, open database.
#[derive(Clone)]
pub struct DatabaseHandle {
    key: DatabaseKey,
    name: String,
    connection: Arc<dyn Connection>,
}

impl DatabaseHandle {
    pub fn new(key: DatabaseKey, name: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        Self {
            key,
            name: name.into(),
            connection,
        }
    }

    pub fn key(&self) -> DatabaseKey {
        self.key
    }

    /// Physical database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish()
    }
}

/// A cached, resolved collection on a specific database.
///
/// Clones share the underlying collection; two handles from the same
/// registry entry are [`same_collection`](Self::same_collection).
#[derive(Clone)]
pub struct CollectionHandle {
    database: DatabaseKey,
    database_name: String,
    name: CollectionName,
    inner: Arc<dyn DocumentCollection>,
}

impl CollectionHandle {
    pub fn new(
        database: DatabaseKey,
        database_name: impl Into<String>,
        name: CollectionName,
        inner: Arc<dyn DocumentCollection>,
    ) -> Self {
        Self {
            database,
            database_name: database_name.into(),
            name,
            inner,
        }
    }

    pub fn database(&self) -> DatabaseKey {
        self.database
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn name(&self) -> &CollectionName {
        &self.name
    }

    /// `database|collection`, the form used in log messages.
    pub fn namespace(&self) -> String {
        format!("{}|{}", self.database_name, self.name)
    }

    pub fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.inner
    }

    /// Whether both handles point at the same underlying collection object.
    pub fn same_collection(&self, other: &CollectionHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner), Arc::as_ptr(&other.inner))
    }
}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("database", &self.database)
            .field("namespace", &self.namespace())
            .finish()
    }
}

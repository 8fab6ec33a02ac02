use std::path::Path;
use std::time::Duration;

use nexus_migrate::{FailurePolicy, RetryPolicy};
use nexus_registry::RegistryConfig;
use nexus_types::{DatabaseKey, DatabaseNames, SENTINEL_ORG_NAME};
use serde::{Deserialize, Serialize};

use crate::error::{NexusError, NexusResult};

/// Environment variable names read by [`NexusConfig::apply_env`].
pub mod env {
    /// `full` enables the secondary organizations database.
    pub const MODE: &str = "NEXUS_MODE";
    /// `true` enables schema enforcement at startup.
    pub const SCHEMA: &str = "NEXUS_SCHEMA";
    /// Primary database name.
    pub const DATABASE: &str = "DATABASE_STRING";
    /// Primary database name; takes precedence over [`DATABASE`].
    pub const DATABASE_USERS: &str = "DATABASE_USERS_STRING";
    /// Secondary (organizations) database name.
    pub const DATABASE_ORGS: &str = "DATABASE_ORGS_STRING";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    /// Keep organizations in their own database.
    pub secondary_database_enabled: bool,
    /// Run the migrations during `initialize`.
    pub schema_enforcement_enabled: bool,
    /// Organization every user is linked to.
    pub sentinel_org: String,
    pub connect_timeout_ms: u64,
    pub query_timeout_ms: u64,
    /// Extra attempts for a transient failure.
    pub connect_retries: u32,
    pub retry_backoff_ms: u64,
    pub failure_policy: FailurePolicy,
    pub databases: DatabaseNames,
}

impl Default for NexusConfig {
    fn default() -> Self {
        Self {
            secondary_database_enabled: false,
            schema_enforcement_enabled: false,
            sentinel_org: SENTINEL_ORG_NAME.into(),
            connect_timeout_ms: 5_000,
            query_timeout_ms: 10_000,
            connect_retries: 2,
            retry_backoff_ms: 200,
            failure_policy: FailurePolicy::FailFast,
            databases: DatabaseNames::default(),
        }
    }
}

impl NexusConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> NexusResult<Self> {
        toml::from_str(source).map_err(|e| NexusError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> NexusResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| NexusError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> NexusResult<String> {
        toml::to_string_pretty(self).map_err(|e| NexusError::Config(e.to_string()))
    }

    /// Apply environment overrides from `vars`.
    ///
    /// Empty values are ignored. `DATABASE_USERS_STRING` wins over
    /// `DATABASE_STRING` whatever order they arrive in.
    pub fn apply_env<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut primary = None;
        let mut users = None;
        for (key, value) in vars {
            let value = value.as_ref();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                env::MODE => self.secondary_database_enabled = value == "full",
                env::SCHEMA => self.schema_enforcement_enabled = value == "true",
                env::DATABASE => primary = Some(value.to_string()),
                env::DATABASE_USERS => users = Some(value.to_string()),
                env::DATABASE_ORGS => self.databases.organizations = value.to_string(),
                _ => {}
            }
        }
        if let Some(name) = users.or(primary) {
            self.databases.primary = name;
        }
    }

    /// Builder form of [`Self::apply_env`] over the process environment.
    pub fn with_process_env(mut self) -> Self {
        self.apply_env(std::env::vars());
        self
    }

    pub fn validate(&self) -> NexusResult<()> {
        self.databases
            .validate()
            .map_err(|e| NexusError::Config(e.to_string()))?;
        if self.secondary_database_enabled && self.databases.primary == self.databases.organizations {
            return Err(NexusError::Config(format!(
                "primary and organizations databases are both {:?}",
                self.databases.primary
            )));
        }
        if self.sentinel_org.trim().is_empty() {
            return Err(NexusError::Config("sentinel_org must not be empty".into()));
        }
        if self.connect_timeout_ms == 0 || self.query_timeout_ms == 0 {
            return Err(NexusError::Config("timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.connect_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            names: self.databases.clone(),
            connect_timeout: self.connect_timeout(),
            query_timeout: self.query_timeout(),
        }
    }

    /// Database holding the organizations collection.
    pub fn org_database(&self) -> DatabaseKey {
        if self.secondary_database_enabled {
            DatabaseKey::Organizations
        } else {
            DatabaseKey::Primary
        }
    }

    /// Databases `initialize` opens, in order.
    pub fn startup_databases(&self) -> Vec<DatabaseKey> {
        if self.secondary_database_enabled {
            vec![DatabaseKey::Primary, DatabaseKey::Organizations]
        } else {
            vec![DatabaseKey::Primary]
        }
    }
}

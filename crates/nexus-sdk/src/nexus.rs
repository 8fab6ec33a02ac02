use std::sync::Arc;
use std::time::{Duration, Instant};

use nexus_migrate::{
    CollectionProvider, EnforceOrgSchema, EnforceUserSchema, FailurePolicy, LinkUsersToSentinel,
    MigrationPlan, PlanReport, RegistryCollection, RelationLinker, SchemaEnforcer,
};
use nexus_registry::{CollectionHandle, ConnectionRegistry, RegistryError};
use nexus_statelog::{status, LogEntry, StateLog, StatePatch};
use nexus_store::DatabaseDriver;
use nexus_types::{CanonicalShape, CollectionName, DatabaseKey, OrgSchema, UserSchema};
use tracing::{info, warn};

use crate::config::NexusConfig;
use crate::error::{NexusError, NexusResult};

/// What `initialize` did.
#[derive(Clone, Debug, Default)]
pub struct InitReport {
    /// Databases that were opened.
    pub opened: Vec<DatabaseKey>,
    /// Databases that could not be opened. Only populated under
    /// [`FailurePolicy::Continue`].
    pub failed: Vec<(DatabaseKey, RegistryError)>,
    /// Migration results, when schema enforcement is enabled.
    pub migrations: Option<PlanReport>,
    pub elapsed: Duration,
}

impl InitReport {
    /// Every database opened and every migration passed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.migrations.as_ref().map_or(true, PlanReport::is_success)
    }
}

/// The data layer: owns the state log, the connection registry, and the
/// startup migrations.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> nexus_sdk::NexusResult<()> {
/// use std::sync::Arc;
/// use nexus_sdk::{Nexus, NexusConfig};
/// use nexus_store::InMemoryDriver;
///
/// let config = NexusConfig {
///     schema_enforcement_enabled: true,
///     ..NexusConfig::default()
/// };
/// let nexus = Nexus::new(config, Arc::new(InMemoryDriver::new()))?;
/// let report = nexus.initialize().await?;
/// assert!(report.is_clean());
///
/// let users = nexus.user_collection().await?;
/// assert_eq!(users.namespace(), "nexus|users");
/// # Ok(())
/// # }
/// ```
pub struct Nexus {
    config: NexusConfig,
    log: Arc<StateLog>,
    registry: Arc<ConnectionRegistry>,
    plan: MigrationPlan,
}

impl Nexus {
    /// Validate `config` and wire up the registry and migrations.
    ///
    /// Nothing is connected until [`initialize`](Self::initialize) or an
    /// accessor is called.
    pub fn new(config: NexusConfig, driver: Arc<dyn DatabaseDriver>) -> NexusResult<Self> {
        config.validate()?;

        let log = Arc::new(StateLog::new());
        let registry = Arc::new(ConnectionRegistry::new(
            driver,
            Arc::clone(&log),
            config.registry_config(),
        ));
        let plan = build_plan(&config, &log, &registry);

        Ok(Self {
            config,
            log,
            registry,
            plan,
        })
    }

    /// Run the startup sequence: open the primary database, then the
    /// secondary one when enabled, then the migrations when schema
    /// enforcement is enabled. Each step finishes before the next starts.
    ///
    /// Transient connect failures are retried first. What remains is
    /// handled by the configured [`FailurePolicy`]: `FailFast` returns the
    /// first error, `Continue` records it in the report and carries on.
    pub async fn initialize(&self) -> NexusResult<InitReport> {
        let started = Instant::now();
        let policy = self.config.failure_policy;
        let mut report = InitReport::default();
        info!(
            databases = self.config.startup_databases().len(),
            schema = self.config.schema_enforcement_enabled,
            policy = %policy,
            "initializing data layer"
        );

        for key in self.config.startup_databases() {
            match self.open_with_retry(key).await {
                Ok(()) => report.opened.push(key),
                Err(e) if policy == FailurePolicy::Continue => {
                    warn!(database = %key, error = %e, "database unavailable, continuing");
                    report.failed.push((key, e));
                }
                Err(e) => return Err(e.into()),
            }
        }

        if self.config.schema_enforcement_enabled {
            let plan_report = self.plan.run().await;
            if policy == FailurePolicy::FailFast {
                if let Some((step, e)) = plan_report.first_failure() {
                    return Err(NexusError::Migration {
                        step: step.to_string(),
                        source: e.clone(),
                    });
                }
            }
            report.migrations = Some(plan_report);
        }

        report.elapsed = started.elapsed();
        self.log.update(
            StatePatch::new()
                .action("init")
                .verb("nexus")
                .status(status::DONE)
                .message(format!(
                    "{} opened, {} failed",
                    report.opened.len(),
                    report.failed.len()
                )),
        );
        info!(
            opened = report.opened.len(),
            failed = report.failed.len(),
            clean = report.is_clean(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "data layer initialized"
        );
        Ok(report)
    }

    async fn open_with_retry(&self, key: DatabaseKey) -> Result<(), RegistryError> {
        let retry = self.config.retry_policy();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.registry.database(key).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_transient() && attempt <= retry.retries => {
                    warn!(database = %key, attempt, error = %e, "connect failed, retrying");
                    self.log.update(
                        StatePatch::new()
                            .status(status::RETRYING)
                            .message(format!("{key} database: attempt {attempt} failed")),
                    );
                    tokio::time::sleep(retry.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The users collection on the primary database.
    pub async fn user_collection(&self) -> NexusResult<CollectionHandle> {
        Ok(self
            .registry
            .collection(DatabaseKey::Primary, &CollectionName::users())
            .await?)
    }

    /// The organizations collection, on the secondary database when it is
    /// enabled and on the primary otherwise.
    pub async fn org_collection(&self) -> NexusResult<CollectionHandle> {
        Ok(self
            .registry
            .collection(self.config.org_database(), &CollectionName::organizations())
            .await?)
    }

    /// Move pending log entries into the history. Returns how many moved.
    pub fn collect_garbage(&self) -> usize {
        self.log.compact()
    }

    /// Compacted log entries, oldest first.
    pub fn history(&self) -> Vec<LogEntry> {
        self.log.history()
    }

    pub fn state_log(&self) -> &Arc<StateLog> {
        &self.log
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &NexusConfig {
        &self.config
    }

    /// Names of the migration steps, in run order.
    pub fn migration_steps(&self) -> Vec<&str> {
        self.plan.step_names()
    }
}

impl std::fmt::Debug for Nexus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nexus")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("log", &self.log)
            .finish()
    }
}

fn build_plan(config: &NexusConfig, log: &Arc<StateLog>, registry: &Arc<ConnectionRegistry>) -> MigrationPlan {
    let users: Arc<dyn CollectionProvider> = Arc::new(RegistryCollection::new(
        Arc::clone(registry),
        DatabaseKey::Primary,
        UserSchema::collection(),
    ));
    let orgs: Arc<dyn CollectionProvider> = Arc::new(RegistryCollection::new(
        Arc::clone(registry),
        config.org_database(),
        OrgSchema::collection(),
    ));
    let enforcer = Arc::new(SchemaEnforcer::new(Arc::clone(log), config.query_timeout()));
    let linker = Arc::new(RelationLinker::new(Arc::clone(log), config.query_timeout()));

    let mut plan =
        MigrationPlan::new(Arc::clone(log), config.failure_policy).with_retry(config.retry_policy());
    plan.add_step(Box::new(EnforceUserSchema::new(Arc::clone(&enforcer), Arc::clone(&users))));
    // Seeding only ever fires on an empty organizations collection.
    plan.add_step(Box::new(EnforceOrgSchema::new(
        enforcer,
        Arc::clone(&orgs),
        config.sentinel_org.clone(),
        true,
    )));
    plan.add_step(Box::new(LinkUsersToSentinel::new(
        linker,
        config.sentinel_org.clone(),
        users,
        orgs,
    )));
    plan
}

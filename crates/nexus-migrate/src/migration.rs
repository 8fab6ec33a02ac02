use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nexus_statelog::{status, StateLog, StatePatch};
use nexus_store::PatchOptions;
use nexus_types::{CanonicalShape, OrgSchema, UserSchema};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::enforce::{EnforceReport, SchemaEnforcer};
use crate::error::{MigrateError, MigrateResult};
use crate::link::{LinkReport, RelationLinker};
use crate::provider::CollectionProvider;

// ---------------------------------------------------------------------------
// Migration trait
// ---------------------------------------------------------------------------

/// What a successful step produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepOutcome {
    Enforced(EnforceReport),
    Linked(LinkReport),
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enforced(r) => {
                write!(f, "{}: {} matched, {} modified", r.collection, r.matched, r.modified)?;
                if let Some(id) = &r.inserted {
                    let id = id.as_str().map_or_else(|| id.to_string(), str::to_string);
                    write!(f, ", seeded {id}")?;
                }
                Ok(())
            }
            Self::Linked(r) => write!(
                f,
                "linked {} users to {} ({} new)",
                r.matched, r.org_name, r.modified
            ),
        }
    }
}

/// One idempotent, re-runnable migration step.
///
/// Steps are `Send + Sync` so a plan can hold them as
/// `Vec<Box<dyn Migration>>`.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Stable step name, e.g. `"enforce-user-schema"`.
    fn name(&self) -> &str;

    async fn run(&self) -> MigrateResult<StepOutcome>;
}

// ---------------------------------------------------------------------------
// Built-in steps
// ---------------------------------------------------------------------------

/// Bring every user up to [`UserSchema`]. Never inserts users.
pub struct EnforceUserSchema {
    enforcer: Arc<SchemaEnforcer>,
    users: Arc<dyn CollectionProvider>,
}

impl EnforceUserSchema {
    pub fn new(enforcer: Arc<SchemaEnforcer>, users: Arc<dyn CollectionProvider>) -> Self {
        Self { enforcer, users }
    }
}

#[async_trait]
impl Migration for EnforceUserSchema {
    fn name(&self) -> &str {
        "enforce-user-schema"
    }

    async fn run(&self) -> MigrateResult<StepOutcome> {
        self.enforcer
            .enforce_shape::<UserSchema>(self.users.as_ref(), PatchOptions::update_only())
            .await
            .map(StepOutcome::Enforced)
    }
}

/// Bring every organization up to [`OrgSchema`], named after the sentinel.
///
/// With `seed_sentinel`, an empty organizations collection receives the
/// sentinel organization.
pub struct EnforceOrgSchema {
    enforcer: Arc<SchemaEnforcer>,
    orgs: Arc<dyn CollectionProvider>,
    sentinel: String,
    seed_sentinel: bool,
}

impl EnforceOrgSchema {
    pub fn new(
        enforcer: Arc<SchemaEnforcer>,
        orgs: Arc<dyn CollectionProvider>,
        sentinel: impl Into<String>,
        seed_sentinel: bool,
    ) -> Self {
        Self {
            enforcer,
            orgs,
            sentinel: sentinel.into(),
            seed_sentinel,
        }
    }
}

#[async_trait]
impl Migration for EnforceOrgSchema {
    fn name(&self) -> &str {
        "enforce-org-schema"
    }

    async fn run(&self) -> MigrateResult<StepOutcome> {
        let shape = OrgSchema {
            name: self.sentinel.clone(),
            ..OrgSchema::canonical()
        };
        let schema = shape.to_document().map_err(|e| MigrateError::SchemaEnforcement {
            collection: self.orgs.describe(),
            reason: e.to_string(),
        })?;
        let options = if self.seed_sentinel {
            PatchOptions::upsert()
        } else {
            PatchOptions::update_only()
        };
        self.enforcer
            .enforce(&schema, self.orgs.as_ref(), options)
            .await
            .map(StepOutcome::Enforced)
    }
}

/// Reference the sentinel organization from every user.
pub struct LinkUsersToSentinel {
    linker: Arc<RelationLinker>,
    sentinel: String,
    users: Arc<dyn CollectionProvider>,
    orgs: Arc<dyn CollectionProvider>,
}

impl LinkUsersToSentinel {
    pub fn new(
        linker: Arc<RelationLinker>,
        sentinel: impl Into<String>,
        users: Arc<dyn CollectionProvider>,
        orgs: Arc<dyn CollectionProvider>,
    ) -> Self {
        Self {
            linker,
            sentinel: sentinel.into(),
            users,
            orgs,
        }
    }
}

#[async_trait]
impl Migration for LinkUsersToSentinel {
    fn name(&self) -> &str {
        "link-users-to-sentinel"
    }

    async fn run(&self) -> MigrateResult<StepOutcome> {
        self.linker
            .link_users_to_org(&self.sentinel, self.users.as_ref(), self.orgs.as_ref())
            .await
            .map(StepOutcome::Linked)
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What a plan does after a step fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failed step; later steps are skipped.
    #[default]
    FailFast,
    /// Record the failure and run the remaining steps.
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => f.write_str("fail-fast"),
            Self::Continue => f.write_str("continue"),
        }
    }
}

/// How often a step failing with a transient error is re-run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    pub backoff: Duration,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Recorded result of one step.
#[derive(Clone, Debug)]
pub struct StepResult {
    pub name: String,
    pub outcome: Result<StepOutcome, MigrateError>,
    /// Attempts made, retries included.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl StepResult {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Outcome of a whole plan.
#[derive(Clone, Debug, Default)]
pub struct PlanReport {
    /// Steps that ran, in order.
    pub steps: Vec<StepResult>,
    /// Steps never started because an earlier one failed.
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

impl PlanReport {
    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.steps.iter().all(StepResult::passed)
    }

    /// Whether the plan stopped early.
    pub fn aborted(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// The first failed step and its error.
    pub fn first_failure(&self) -> Option<(&str, &MigrateError)> {
        self.steps.iter().find_map(|s| match &s.outcome {
            Err(e) => Some((s.name.as_str(), e)),
            Ok(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.passed())
    }
}

// ---------------------------------------------------------------------------
// MigrationPlan
// ---------------------------------------------------------------------------

/// An ordered list of steps run one after another, each awaited to
/// completion before the next starts.
pub struct MigrationPlan {
    steps: Vec<Box<dyn Migration>>,
    policy: FailurePolicy,
    retry: RetryPolicy,
    log: Arc<StateLog>,
}

impl MigrationPlan {
    pub fn new(log: Arc<StateLog>, policy: FailurePolicy) -> Self {
        Self {
            steps: Vec::new(),
            policy,
            retry: RetryPolicy::default(),
            log,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Append a step to the end of the plan.
    pub fn add_step(&mut self, step: Box<dyn Migration>) {
        self.steps.push(step);
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order under the plan's failure policy.
    ///
    /// Step failures are reported, not returned: the caller decides what a
    /// failed plan means.
    pub async fn run(&self) -> PlanReport {
        let started = Instant::now();
        let mut report = PlanReport::default();

        for (index, step) in self.steps.iter().enumerate() {
            let result = self.run_step(step.as_ref()).await;
            let failed = !result.passed();
            report.steps.push(result);

            if failed && self.policy == FailurePolicy::FailFast {
                report.skipped = self.steps[index + 1..]
                    .iter()
                    .map(|s| s.name().to_string())
                    .collect();
                error!(step = step.name(), skipped = report.skipped.len(), "migration plan aborted");
                break;
            }
        }

        report.elapsed = started.elapsed();
        info!(
            steps = report.steps.len(),
            failed = report.failures().count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "migration plan finished"
        );
        report
    }

    async fn run_step(&self, step: &dyn Migration) -> StepResult {
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match step.run().await {
                Err(e) if e.is_transient() && attempts <= self.retry.retries => {
                    warn!(step = step.name(), attempt = attempts, error = %e, "transient step failure, retrying");
                    self.log.update(
                        StatePatch::new()
                            .status(status::RETRYING)
                            .message(format!("{}: attempt {attempts} failed: {e}", step.name())),
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                outcome => {
                    return StepResult {
                        name: step.name().to_string(),
                        outcome,
                        attempts,
                        elapsed: started.elapsed(),
                    }
                }
            }
        }
    }
}

impl fmt::Debug for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationPlan")
            .field("steps", &self.step_names())
            .field("policy", &self.policy)
            .field("retry", &self.retry)
            .finish()
    }
}

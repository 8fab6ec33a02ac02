use std::sync::Arc;
use std::time::Duration;

use nexus_statelog::{status, StateLog, StatePatch};
use nexus_store::{Filter, PatchOp, PatchOptions};
use nexus_types::ID_FIELD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{MigrateError, MigrateResult};
use crate::provider::{bounded, guarded, CollectionProvider};

/// Field on a user document holding organization references.
pub const ORGANIZATIONS_FIELD: &str = "organizations";

/// What one linking pass did.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkReport {
    pub org_name: String,
    /// The organization's `_id`, exactly as stored.
    pub org_id: Value,
    /// Users examined.
    pub matched: u64,
    /// Users that gained the reference on this pass.
    pub modified: u64,
}

/// Adds an organization reference to every user.
///
/// The reference is appended only when absent, so re-running never
/// duplicates it. The link is one-directional: the organization document is
/// only read.
pub struct RelationLinker {
    log: Arc<StateLog>,
    query_timeout: Duration,
}

impl RelationLinker {
    pub fn new(log: Arc<StateLog>, query_timeout: Duration) -> Self {
        Self { log, query_timeout }
    }

    /// Link every user to the organization named `org_name`.
    ///
    /// When no such organization exists this fails with
    /// [`MigrateError::MissingSentinel`] and no user document is touched.
    pub async fn link_users_to_org(
        &self,
        org_name: &str,
        users: &dyn CollectionProvider,
        orgs: &dyn CollectionProvider,
    ) -> MigrateResult<LinkReport> {
        let label = format!("{} -> {org_name}", users.describe());
        self.log.update(
            StatePatch::new()
                .action("schema-enforcing")
                .verb("relations")
                .status(status::LOADING)
                .message(label.clone()),
        );

        let report = guarded(&self.log, self.link(org_name, users, orgs)).await?;

        self.log.update(StatePatch::new().status(status::DONE).message(label));
        info!(
            org = %report.org_name,
            org_id = %report.org_id,
            matched = report.matched,
            modified = report.modified,
            "users linked"
        );
        Ok(report)
    }

    async fn link(
        &self,
        org_name: &str,
        users: &dyn CollectionProvider,
        orgs: &dyn CollectionProvider,
    ) -> MigrateResult<LinkReport> {
        let relation_error = |reason: String| MigrateError::Relation {
            org: org_name.to_string(),
            reason,
        };

        let orgs_label = orgs.describe();
        let org_collection = orgs.collection().await?;
        let org = bounded(
            self.query_timeout,
            "organization lookup",
            &orgs_label,
            org_collection.find_one(&Filter::eq("name", org_name)),
        )
        .await?
        .map_err(|e| relation_error(e.to_string()))?
        .ok_or_else(|| MigrateError::MissingSentinel {
            name: org_name.to_string(),
        })?;
        let org_id = org
            .id_value()
            .cloned()
            .ok_or_else(|| relation_error(format!("organization in {orgs_label} has no {ID_FIELD}")))?;

        let users_label = users.describe();
        let user_collection = users.collection().await?;
        let ops = [PatchOp::add_to_set(ORGANIZATIONS_FIELD, org_id.clone())];
        let outcome = bounded(
            self.query_timeout,
            "relation patch",
            &users_label,
            user_collection.patch_all(&ops, PatchOptions::update_only()),
        )
        .await?
        .map_err(|e| relation_error(e.to_string()))?;

        Ok(LinkReport {
            org_name: org_name.to_string(),
            org_id,
            matched: outcome.matched,
            modified: outcome.modified,
        })
    }
}

impl std::fmt::Debug for RelationLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationLinker")
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

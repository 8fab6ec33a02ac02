//! Schema enforcement and relation linking for the Nexus data layer.
//!
//! Every step here is idempotent and restartable: it reads the current state
//! of a collection and only fills in what is missing, so a crashed or
//! partially applied run is repaired by running it again.
//!
//! # Quick Start
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use nexus_migrate::{FixedCollection, SchemaEnforcer};
//! use nexus_statelog::StateLog;
//! use nexus_store::{DocumentCollection, InMemoryCollection, PatchOptions};
//! use nexus_types::{CollectionName, Document, UserSchema};
//!
//! let users = Arc::new(InMemoryCollection::new(CollectionName::users()));
//! users.insert_one(Document::new()).await.unwrap();
//!
//! let enforcer = SchemaEnforcer::new(Arc::new(StateLog::new()), Duration::from_secs(1));
//! let report = enforcer
//!     .enforce_shape::<UserSchema>(&FixedCollection::new(users.clone()), PatchOptions::update_only())
//!     .await
//!     .unwrap();
//! assert_eq!(report.modified, 1);
//! # }
//! ```

pub mod enforce;
pub mod error;
pub mod link;
pub mod migration;
pub mod provider;

pub use enforce::{leaf_ops, EnforceReport, SchemaEnforcer};
pub use error::{MigrateError, MigrateResult};
pub use link::{LinkReport, RelationLinker, ORGANIZATIONS_FIELD};
pub use migration::{
    EnforceOrgSchema, EnforceUserSchema, FailurePolicy, LinkUsersToSentinel, Migration, MigrationPlan,
    PlanReport, RetryPolicy, StepOutcome, StepResult,
};
pub use provider::{CollectionProvider, FixedCollection, RegistryCollection};

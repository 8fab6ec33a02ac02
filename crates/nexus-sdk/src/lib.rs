//! High-level entry point for the Nexus data layer.
//!
//! [`Nexus`] ties the pieces together: it owns the [`StateLog`], the
//! [`ConnectionRegistry`], and the startup migrations, runs them in order
//! from [`Nexus::initialize`], and hands out the users and organizations
//! collections afterwards.
//!
//! Configuration comes from [`NexusConfig`]: a TOML file, environment
//! overrides, or plain struct construction.

pub mod config;
pub mod error;
pub mod nexus;

pub use config::NexusConfig;
pub use error::{NexusError, NexusResult};
pub use nexus::{InitReport, Nexus};

// Re-export key types
pub use nexus_migrate::{FailurePolicy, PlanReport, StepOutcome, StepResult};
pub use nexus_registry::{CollectionHandle, ConnectionRegistry};
pub use nexus_statelog::{LogEntry, StateLog};
pub use nexus_types::{CollectionName, DatabaseKey, DatabaseNames, Document, DocumentId};

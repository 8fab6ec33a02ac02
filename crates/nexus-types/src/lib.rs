//! Foundation types for the Nexus data layer.
//!
//! Every other Nexus crate depends on `nexus-types`. Nothing in here performs
//! I/O; these are the identifiers and document shapes the registry, the
//! migrations, and the drivers agree on.
//!
//! # Key Types
//!
//! - [`DatabaseKey`]: Closed set of logical databases the application knows
//! - [`DatabaseNames`]: Physical names the logical databases resolve to
//! - [`CollectionName`]: Validated collection name
//! - [`Document`] / [`DocumentId`]: JSON documents with time-ordered ids
//! - [`UserSchema`] / [`OrgSchema`]: Canonical document shapes

pub mod collection;
pub mod database;
pub mod document;
pub mod error;
pub mod schema;

pub use collection::CollectionName;
pub use database::{DatabaseKey, DatabaseNames};
pub use document::{Document, DocumentId, ID_FIELD};
pub use error::TypeError;
pub use schema::{
    CanonicalShape, CharacterId, Favorites, OrgMeta, OrgSchema, UserSchema, SENTINEL_ORG_NAME,
};

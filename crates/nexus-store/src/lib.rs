//! Document driver interface for the Nexus data layer.
//!
//! The data layer never talks to a database server directly. It consumes a
//! driver that can connect to a database by name, resolve collections on a
//! connection, and run bulk patch operations and lookups on a collection.
//!
//! # Driver Surface
//!
//! - [`DatabaseDriver`] -- `connect(name)` to a logical database
//! - [`Connection`] -- an open database, resolves collections by name
//! - [`DocumentCollection`] -- bulk patches, lookups, and inserts
//!
//! # Backends
//!
//! - [`InMemoryDriver`] -- `HashMap`-based backend for tests, previews, and
//!   embedding, with failure and latency injection
//!
//! # Patch Rules
//!
//! 1. Field paths use dot notation and only descend through objects.
//! 2. A patch that hits a non-object on the way to its field is rejected.
//! 3. `SetIfAbsent` never touches a field that already exists.
//! 4. `AddToSet` never appends a value the array already holds.
//! 5. A bulk patch is all-or-nothing in the in-memory backend.

pub mod error;
pub mod memory;
pub mod patch;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryCollection, InMemoryDatabase, InMemoryDriver};
pub use patch::{apply_ops, Filter, PatchOp, PatchOptions, PatchOutcome};
pub use traits::{Connection, DatabaseDriver, DocumentCollection};

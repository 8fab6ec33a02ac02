//! Lazy registry of database and collection handles.
//!
//! The registry opens a logical database the first time someone asks for
//! it, resolves collections the same way, and keeps every handle for the
//! rest of its lifetime.
//!
//! # Guarantees
//!
//! - **Single-flight**: concurrent first requests for the same database or
//!   collection share one attempt and all receive its outcome, success or
//!   failure.
//! - **No poisoned entries**: a failed or timed-out attempt leaves nothing
//!   in the cache; the next request tries again.
//! - **Pure reads once cached**: a cached handle is returned without I/O.
//! - **Recorded failures**: every failure is written to the [`StateLog`]
//!   once per attempt and returned as a typed [`RegistryError`].
//!
//! # Modules
//!
//! - [`error`]: [`RegistryError`] and its transient/permanent split
//! - [`flight`]: The generic [`SingleFlight`] cache
//! - [`handle`]: [`DatabaseHandle`] and [`CollectionHandle`]
//! - [`registry`]: [`ConnectionRegistry`] itself
//!
//! [`StateLog`]: nexus_statelog::StateLog

pub mod error;
pub mod flight;
pub mod handle;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use flight::SingleFlight;
pub use handle::{CollectionHandle, DatabaseHandle};
pub use registry::{ConnectionRegistry, RegistryConfig};

//! State cursor and event history for the Nexus data layer.
//!
//! Every step the data layer takes (connecting, resolving a collection,
//! enforcing a schema) is recorded as a [`LogEntry`]. A [`StateLog`] keeps:
//!
//! - a [`StateCursor`] with the last-known action, verb, status, and message;
//! - a pending buffer of entries recorded since the last compaction;
//! - the compacted history.
//!
//! Each entry is also emitted as a `tracing` event under the `nexus::db`
//! target, so the log is visible through whatever subscriber the process
//! installs.

pub mod entry;
pub mod state_log;

pub use entry::{status, LogEntry, LogKind, StateCursor, StatePatch};
pub use state_log::StateLog;

use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::entry::{LogEntry, StateCursor, StatePatch};

#[derive(Default)]
struct LogState {
    cursor: StateCursor,
    pending: Vec<LogEntry>,
    history: Vec<LogEntry>,
    next_seq: u64,
}

/// Cursor, pending buffer, and history behind one lock.
///
/// Every update is a single merge-and-append under the lock, so concurrent
/// updates never interleave inside an entry. The lock is never held across
/// an `.await`.
pub struct StateLog {
    state: Mutex<LogState>,
}

impl StateLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                next_seq: 1,
                ..LogState::default()
            }),
        }
    }

    // A panic while holding the lock cannot leave a half-written entry, so
    // a poisoned lock is still consistent.
    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge `patch` into the cursor and append a snapshot to the pending
    /// buffer. Returns the appended entry.
    pub fn update(&self, patch: StatePatch) -> LogEntry {
        let entry = {
            let mut state = self.state();
            state.cursor.merge(&patch);
            let entry = LogEntry::snapshot(state.next_seq, &state.cursor);
            state.next_seq += 1;
            state.pending.push(entry.clone());
            entry
        };
        emit(&entry);
        entry
    }

    /// Record a failure: `update` with status `error` and `message`.
    pub fn record_failure(&self, message: impl Into<String>) -> LogEntry {
        self.update(StatePatch::failure(message))
    }

    /// Await `operation`, recording its error (if any) as a failure.
    ///
    /// The result is handed back unchanged: a failure is both logged and
    /// returned, never swallowed.
    pub async fn run_guarded<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let result = operation.await;
        if let Err(e) = &result {
            self.record_failure(e.to_string());
        }
        result
    }

    /// Move every pending entry into the history. Returns how many moved.
    pub fn compact(&self) -> usize {
        let mut state = self.state();
        let moved = std::mem::take(&mut state.pending);
        let count = moved.len();
        state.history.extend(moved);
        if count > 0 {
            debug!(target: "nexus::db", moved = count, history = state.history.len(), "log compacted");
        }
        count
    }

    /// Snapshot of the current cursor.
    pub fn cursor(&self) -> StateCursor {
        self.state().cursor.clone()
    }

    /// Entries recorded since the last compaction.
    pub fn pending(&self) -> Vec<LogEntry> {
        self.state().pending.clone()
    }

    /// Compacted entries, oldest first.
    pub fn history(&self) -> Vec<LogEntry> {
        self.state().history.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }

    /// Every entry, compacted and pending, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        let state = self.state();
        state.history.iter().chain(state.pending.iter()).cloned().collect()
    }

    /// The most recent error entry, if any.
    pub fn last_error(&self) -> Option<LogEntry> {
        let state = self.state();
        state
            .pending
            .iter()
            .rev()
            .chain(state.history.iter().rev())
            .find(|e| e.is_error())
            .cloned()
    }
}

impl Default for StateLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("StateLog")
            .field("cursor", &state.cursor)
            .field("pending", &state.pending.len())
            .field("history", &state.history.len())
            .finish()
    }
}

fn emit(entry: &LogEntry) {
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    if entry.is_error() {
        error!(
            target: "nexus::db",
            seq = entry.seq,
            action = %field(&entry.action),
            verb = %field(&entry.verb),
            message = %field(&entry.message),
            "db error"
        );
    } else {
        debug!(
            target: "nexus::db",
            seq = entry.seq,
            action = %field(&entry.action),
            verb = %field(&entry.verb),
            status = %field(&entry.status),
            message = %field(&entry.message),
            "db state"
        );
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known status values.
pub mod status {
    pub const CONNECTING: &str = "connecting";
    pub const LOADING: &str = "loading";
    pub const READY: &str = "ready";
    pub const DONE: &str = "done";
    pub const RETRYING: &str = "retrying";
    pub const ERROR: &str = "error";
}

/// Classification of log entries. The data layer only records `db` entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Db,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Db => f.write_str("db"),
        }
    }
}

/// A partial update to the [`StateCursor`].
///
/// Fields left as `None` are not touched by the merge. An empty string is a
/// value like any other.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePatch {
    pub action: Option<String>,
    pub verb: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn verb(mut self, verb: impl Into<String>) -> Self {
        self.verb = Some(verb.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The patch recorded for a failure: status `error` plus the message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new().status(status::ERROR).message(message)
    }

    pub fn is_empty(&self) -> bool {
        self.action.is_none() && self.verb.is_none() && self.status.is_none() && self.message.is_none()
    }
}

/// Last-known state of the data layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCursor {
    pub action: Option<String>,
    pub verb: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
}

impl StateCursor {
    /// Overwrite the fields `patch` supplies and keep the rest.
    pub fn merge(&mut self, patch: &StatePatch) {
        fn take(field: &mut Option<String>, update: &Option<String>) {
            if let Some(value) = update {
                *field = Some(value.clone());
            }
        }
        take(&mut self.action, &patch.action);
        take(&mut self.verb, &patch.verb);
        take(&mut self.status, &patch.status);
        take(&mut self.message, &patch.message);
    }
}

/// One immutable snapshot of the cursor, taken right after an update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log; strictly increasing per [`crate::StateLog`].
    pub seq: u64,
    pub kind: LogKind,
    pub action: Option<String>,
    pub verb: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl LogEntry {
    pub(crate) fn snapshot(seq: u64, cursor: &StateCursor) -> Self {
        Self {
            seq,
            kind: LogKind::Db,
            action: cursor.action.clone(),
            verb: cursor.verb.clone(),
            status: cursor.status.clone(),
            message: cursor.message.clone(),
            at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some(status::ERROR)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
        write!(
            f,
            "#{} [{}] {} {} {}: {}",
            self.seq,
            self.kind,
            field(&self.action),
            field(&self.verb),
            field(&self.status),
            field(&self.message),
        )
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Logical databases the application can open.
///
/// The set is closed: callers never look a database up by an arbitrary
/// string. The physical name each key maps to lives in [`DatabaseNames`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseKey {
    /// Holds the `users` collection, and `organizations` unless the
    /// secondary database is enabled.
    Primary,
    /// Secondary database holding `organizations` in full mode.
    Organizations,
}

impl DatabaseKey {
    /// Every known logical database, primary first.
    pub const ALL: [DatabaseKey; 2] = [DatabaseKey::Primary, DatabaseKey::Organizations];

    /// Short label used in log messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Organizations => "organizations",
        }
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Physical database names for each [`DatabaseKey`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseNames {
    pub primary: String,
    pub organizations: String,
}

impl Default for DatabaseNames {
    fn default() -> Self {
        Self {
            primary: "nexus".into(),
            organizations: "organizations".into(),
        }
    }
}

impl DatabaseNames {
    /// The physical name `key` resolves to.
    pub fn resolve(&self, key: DatabaseKey) -> &str {
        match key {
            DatabaseKey::Primary => &self.primary,
            DatabaseKey::Organizations => &self.organizations,
        }
    }

    /// Check that every name is usable as a database name.
    pub fn validate(&self) -> Result<(), TypeError> {
        for key in DatabaseKey::ALL {
            validate_database_name(self.resolve(key))?;
        }
        Ok(())
    }
}

/// Characters a database name may not contain.
const FORBIDDEN_DB_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

/// Validate a physical database name.
pub fn validate_database_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(TypeError::InvalidDatabaseName {
            name: name.to_string(),
            reason: "database name must not be empty".into(),
        });
    }
    if name.len() > 63 {
        return Err(TypeError::InvalidDatabaseName {
            name: name.to_string(),
            reason: format!("longer than 63 bytes ({})", name.len()),
        });
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN_DB_CHARS.contains(c)) {
        return Err(TypeError::InvalidDatabaseName {
            name: name.to_string(),
            reason: format!("contains forbidden character: {ch:?}"),
        });
    }
    Ok(())
}

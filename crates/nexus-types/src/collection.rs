//! Collection name validation.
//!
//! Valid collection names:
//! - Must be non-empty and not only whitespace
//! - Must not contain `$` or NUL
//! - Must not start with `system.` (reserved by the server)
//! - Must not start or end with `.`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A validated collection name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionName(String);

impl CollectionName {
    /// Validate and wrap a collection name.
    ///
    /// # Examples
    ///
    /// ```
    /// use nexus_types::CollectionName;
    ///
    /// assert!(CollectionName::new("users").is_ok());
    /// assert!(CollectionName::new("").is_err());
    /// assert!(CollectionName::new("bad$name").is_err());
    /// ```
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        validate_collection_name(&name)?;
        Ok(Self(name))
    }

    /// The `users` collection.
    pub fn users() -> Self {
        Self("users".into())
    }

    /// The `organizations` collection.
    pub fn organizations() -> Self {
        Self("organizations".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_collection_name(name: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidCollectionName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("collection name must not be empty"));
    }
    if name.contains('$') {
        return Err(invalid("must not contain '$'"));
    }
    if name.contains('\0') {
        return Err(invalid("must not contain NUL"));
    }
    if name.starts_with("system.") {
        return Err(invalid("the 'system.' prefix is reserved"));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(invalid("must not start or end with '.'"));
    }
    Ok(())
}

impl TryFrom<String> for CollectionName {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CollectionName> for String {
    fn from(name: CollectionName) -> Self {
        name.0
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionName({})", self.0)
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

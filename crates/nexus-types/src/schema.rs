//! Canonical document shapes for the `users` and `organizations` collections.
//!
//! A canonical shape is the set of fields every document in a collection is
//! expected to carry. The shape's values are the defaults written into
//! documents that lack a field; fields a document already has are left alone.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::CollectionName;
use crate::document::Document;
use crate::error::TypeError;

/// Name of the organization every user is linked to by default.
pub const SENTINEL_ORG_NAME: &str = "demo";

/// Identifier of a Rick and Morty character.
pub type CharacterId = u64;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorites {
    pub characters: Vec<CharacterId>,
}

/// Canonical user document.
///
/// `organizations` holds the raw `_id` of every organization the user
/// belongs to.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSchema {
    pub favorites: Favorites,
    pub organizations: Vec<Value>,
}

/// Per-organization metadata, mirroring the user's favorites.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMeta {
    pub favorites: Favorites,
}

/// Canonical organization document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrgSchema {
    pub name: String,
    pub members: Vec<Value>,
    pub rickmorty_meta: OrgMeta,
}

impl Default for OrgSchema {
    fn default() -> Self {
        Self {
            name: SENTINEL_ORG_NAME.into(),
            members: Vec::new(),
            rickmorty_meta: OrgMeta::default(),
        }
    }
}

/// A document shape that can be enforced onto a collection.
pub trait CanonicalShape: Serialize {
    /// The collection this shape belongs to.
    fn collection() -> CollectionName;

    /// The canonical (default) instance.
    fn canonical() -> Self;

    /// Render this instance as a document, without an `_id`.
    fn to_document(&self) -> Result<Document, TypeError> {
        let value =
            serde_json::to_value(self).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Document::from_value(value)
    }
}

impl CanonicalShape for UserSchema {
    fn collection() -> CollectionName {
        CollectionName::users()
    }

    fn canonical() -> Self {
        Self::default()
    }
}

impl CanonicalShape for OrgSchema {
    fn collection() -> CollectionName {
        CollectionName::organizations()
    }

    fn canonical() -> Self {
        Self::default()
    }
}

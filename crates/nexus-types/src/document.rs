use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;

/// Name of the identity field every stored document carries.
pub const ID_FIELD: &str = "_id";

/// Identifier generated for documents stored without an `_id` (UUID v7 for
/// time-ordering). Documents may carry any other JSON `_id`; those are kept
/// as-is and referenced by their raw value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

impl DocumentId {
    /// Generate a new time-ordered document ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }

    /// The id as the JSON value stored in `_id` and in references.
    pub fn to_value(&self) -> Value {
        Value::String(self.0.to_string())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for DocumentId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidDocumentId(e.to_string()))
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.short_id())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A schemaless JSON document.
///
/// Documents are plain JSON objects. Field paths use dot notation
/// (`favorites.characters`) and only descend through nested objects.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// An empty document with no `_id`.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(TypeError::NotAnObject),
        }
    }

    /// The raw `_id` value, whatever its type. A `null` id counts as absent.
    pub fn id_value(&self) -> Option<&Value> {
        self.0.get(ID_FIELD).filter(|id| !id.is_null())
    }

    /// The `_id` as a [`DocumentId`], when it is a UUID string.
    pub fn id(&self) -> Option<DocumentId> {
        self.id_value()?.as_str()?.parse().ok()
    }

    /// Return the existing `_id` value, assigning a fresh [`DocumentId`] only
    /// when there is none.
    pub fn ensure_id(&mut self) -> Value {
        if let Some(id) = self.id_value() {
            return id.clone();
        }
        let id = DocumentId::new().to_value();
        self.0.insert(ID_FIELD.into(), id.clone());
        id
    }

    /// Builder form of [`Self::ensure_id`] with an explicit id.
    pub fn with_id(mut self, id: DocumentId) -> Self {
        self.0.insert(ID_FIELD.into(), id.to_value());
        self
    }

    /// Top-level field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Top-level field insert, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Look up a dotted field path.
    ///
    /// ```
    /// use nexus_types::Document;
    /// use serde_json::json;
    ///
    /// let doc = Document::from_value(json!({"a": {"b": 1}})).unwrap();
    /// assert_eq!(doc.get_path("a.b"), Some(&json!(1)));
    /// assert_eq!(doc.get_path("a.c"), None);
    /// ```
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Number of top-level fields, `_id` included.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Document {
    type Error = TypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

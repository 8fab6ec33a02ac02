use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nexus_types::Document;

use crate::error::{StoreError, StoreResult};

/// Equality filter over dotted field paths.
///
/// The empty filter matches every document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Match every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match documents whose `path` equals `value`.
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(path, value)
    }

    /// Add another equality clause.
    pub fn and_eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((path.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(path, value)| document.get_path(path) == Some(value))
    }
}

/// A single field-level update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum PatchOp {
    /// Write `value` at `path`, replacing whatever is there.
    Set { path: String, value: Value },
    /// Write `value` at `path` only if the field does not exist yet.
    SetIfAbsent { path: String, value: Value },
    /// Append `value` to the array at `path` unless it is already present.
    /// A missing field becomes a one-element array.
    AddToSet { path: String, value: Value },
}

impl PatchOp {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn set_if_absent(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::SetIfAbsent {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn add_to_set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::AddToSet {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set { path, .. } | Self::SetIfAbsent { path, .. } | Self::AddToSet { path, .. } => {
                path
            }
        }
    }
}

/// Options for a bulk patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOptions {
    /// Insert a new document when the filter matches nothing.
    pub insert_if_none_match: bool,
}

impl PatchOptions {
    pub fn update_only() -> Self {
        Self::default()
    }

    pub fn upsert() -> Self {
        Self {
            insert_if_none_match: true,
        }
    }
}

/// What a bulk patch did.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchOutcome {
    /// Documents the filter matched.
    pub matched: u64,
    /// Matched documents that actually changed.
    pub modified: u64,
    /// `_id` of the document inserted because nothing matched.
    pub inserted: Option<Value>,
}

/// Apply `ops` to `document` in order. Returns `true` if anything changed.
///
/// On error the document may be partially patched; callers that need
/// all-or-nothing semantics apply to a copy first.
pub fn apply_ops(document: &mut Document, ops: &[PatchOp]) -> StoreResult<bool> {
    let mut changed = false;
    for op in ops {
        changed |= apply_op(document.as_map_mut(), op)?;
    }
    Ok(changed)
}

fn apply_op(root: &mut Map<String, Value>, op: &PatchOp) -> StoreResult<bool> {
    let path = op.path();
    let (parents, leaf) = split_path(path)?;

    match op {
        PatchOp::Set { value, .. } => {
            let parent = descend(root, path, &parents)?;
            if parent.get(leaf) == Some(value) {
                return Ok(false);
            }
            parent.insert(leaf.to_string(), value.clone());
            Ok(true)
        }
        PatchOp::SetIfAbsent { value, .. } => {
            if lookup(root, &parents, leaf)?.is_some() {
                return Ok(false);
            }
            let parent = descend(root, path, &parents)?;
            parent.insert(leaf.to_string(), value.clone());
            Ok(true)
        }
        PatchOp::AddToSet { value, .. } => {
            let parent = descend(root, path, &parents)?;
            match parent.get_mut(leaf) {
                None => {
                    parent.insert(leaf.to_string(), Value::Array(vec![value.clone()]));
                    Ok(true)
                }
                Some(Value::Array(items)) => {
                    if items.contains(value) {
                        Ok(false)
                    } else {
                        items.push(value.clone());
                        Ok(true)
                    }
                }
                Some(other) => Err(StoreError::PatchRejected {
                    path: path.to_string(),
                    reason: format!("cannot add to non-array {}", kind_of(other)),
                }),
            }
        }
    }
}

fn split_path(path: &str) -> StoreResult<(Vec<&str>, &str)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::PatchRejected {
            path: path.to_string(),
            reason: "empty path segment".into(),
        });
    }
    // split('.') always yields at least one segment
    let leaf = segments.pop().unwrap_or_default();
    Ok((segments, leaf))
}

/// Read-only walk to the leaf. `Ok(None)` when some segment is missing.
fn lookup<'a>(
    root: &'a Map<String, Value>,
    parents: &[&str],
    leaf: &str,
) -> StoreResult<Option<&'a Value>> {
    let mut current = root;
    for segment in parents {
        match current.get(*segment) {
            None => return Ok(None),
            Some(Value::Object(map)) => current = map,
            // A non-object in the way is reported by `descend`.
            Some(_) => return Ok(None),
        }
    }
    Ok(current.get(leaf))
}

/// Walk to the leaf's parent, creating missing objects on the way.
fn descend<'a>(
    root: &'a mut Map<String, Value>,
    path: &str,
    parents: &[&str],
) -> StoreResult<&'a mut Map<String, Value>> {
    let mut current = root;
    for segment in parents {
        let next = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match next {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::PatchRejected {
                    path: path.to_string(),
                    reason: format!("segment {segment:?} is a {}, not an object", kind_of(other)),
                })
            }
        };
    }
    Ok(current)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Seed document for an insert-on-no-match: the filter's equality clauses
/// written as fields.
pub(crate) fn seed_from_filter(filter: &Filter) -> StoreResult<Document> {
    let mut seed = Document::new();
    let ops: Vec<PatchOp> = filter
        .clauses()
        .iter()
        .map(|(path, value)| PatchOp::set(path.clone(), value.clone()))
        .collect();
    apply_ops(&mut seed, &ops)?;
    Ok(seed)
}

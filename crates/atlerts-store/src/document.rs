//! Documents, paths and partial updates.
//!
//! A path alternates collection and document segments:
//! `conversations/{conversationId}/messages/{messageId}`. Collection paths
//! have an odd number of segments, document paths an even number.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Body of a document.
pub type Fields = serde_json::Map<String, Value>;

fn segment_count(path: &str) -> Option<usize> {
    if path.is_empty() {
        return None;
    }
    let mut count = 0;
    for segment in path.split('/') {
        if segment.is_empty() {
            return None;
        }
        count += 1;
    }
    Some(count)
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        match segment_count(&path) {
            Some(n) if n % 2 == 1 => Ok(Self(path)),
            _ => Err(StoreError::InvalidPath(path)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment, used to match collection-group queries.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Path of the document `id` inside this collection.
    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{}", self.0, id))
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        match segment_count(&path) {
            Some(n) if n % 2 == 0 => Ok(Self(path)),
            _ => Err(StoreError::InvalidPath(path)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> CollectionPath {
        let (parent, _) = self.0.rsplit_once('/').unwrap_or(("", &self.0));
        CollectionPath(parent.to_string())
    }

    /// A sub-collection nested under this document.
    pub fn collection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}", self.0, name))
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
}

impl Document {
    pub fn new(path: DocumentPath, fields: Fields) -> Self {
        Self { path, fields }
    }

    pub fn id(&self) -> &str {
        self.path.id()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Deserialize the body into a model. The document id is exposed to the
    /// model as an `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id().to_string()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

/// Serialize a model into a document body.
pub fn encode<T: Serialize>(model: &T) -> Result<Fields> {
    match serde_json::to_value(model)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Serialization(format!(
            "expected an object, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Overwrite the field (last write wins).
    Set(Value),
    /// Add each value to the array field unless already present. Concurrent
    /// unions never drop each other's elements.
    ArrayUnion(Vec<Value>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    updates: BTreeMap<String, FieldUpdate>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.updates
            .insert(field.to_string(), FieldUpdate::Set(value.into()));
        self
    }

    pub fn array_union<V: Into<Value>>(
        mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.updates
            .insert(field.to_string(), FieldUpdate::ArrayUnion(values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldUpdate)> {
        self.updates.iter()
    }

    /// Apply the patch to a document body in place.
    pub fn apply(&self, fields: &mut Fields) {
        for (field, update) in &self.updates {
            match update {
                FieldUpdate::Set(value) => {
                    fields.insert(field.clone(), value.clone());
                }
                FieldUpdate::ArrayUnion(values) => {
                    let entry = fields
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !entry.is_array() {
                        *entry = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = entry {
                        for value in values {
                            if !items.contains(value) {
                                items.push(value.clone());
                            }
                        }
                    }
                }
            }
        }
    }
}

/// One element of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOp {
    pub path: DocumentPath,
    pub patch: Patch,
}

impl UpdateOp {
    pub fn new(path: DocumentPath, patch: Patch) -> Self {
        Self { path, patch }
    }
}

//! Write batches and preconditions

use crate::{DocPath, StoreError};
use serde_json::{Map, Value};

/// A single document mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Replace (or create) the whole document
    Set { path: DocPath, data: Value },
    /// Overwrite the given top-level fields of an existing document
    Merge { path: DocPath, fields: Map<String, Value> },
    /// Remove the document; deleting a missing document is a no-op
    Delete { path: DocPath },
    /// Add `by` to an integer field of an existing document (missing counts as 0)
    Increment { path: DocPath, field: String, by: i64 },
    /// Append each value to an array field unless an equal element is present
    ArrayUnion { path: DocPath, field: String, values: Vec<Value> },
}

impl Write {
    pub fn path(&self) -> &DocPath {
        match self {
            Write::Set { path, .. }
            | Write::Merge { path, .. }
            | Write::Delete { path }
            | Write::Increment { path, .. }
            | Write::ArrayUnion { path, .. } => path,
        }
    }

    /// Compute the document after this write from the document before it
    pub fn apply(&self, current: Option<Value>) -> Result<Option<Value>, StoreError> {
        match self {
            Write::Set { data, .. } => {
                if !data.is_object() {
                    return Err(StoreError::InvalidDocument(format!(
                        "{}: document body must be an object",
                        self.path()
                    )));
                }
                Ok(Some(data.clone()))
            }
            Write::Delete { .. } => Ok(None),
            Write::Merge { fields, .. } => {
                let mut doc = self.existing(current)?;
                let obj = object_mut(&mut doc, self.path())?;
                for (k, v) in fields {
                    obj.insert(k.clone(), v.clone());
                }
                Ok(Some(doc))
            }
            Write::Increment { field, by, .. } => {
                let mut doc = self.existing(current)?;
                let obj = object_mut(&mut doc, self.path())?;
                let value = match obj.get(field) {
                    None | Some(Value::Null) => 0,
                    Some(v) => v.as_i64().ok_or_else(|| {
                        StoreError::InvalidDocument(format!(
                            "{}: field {} is not an integer",
                            self.path(),
                            field
                        ))
                    })?,
                };
                obj.insert(field.clone(), Value::from(value + by));
                Ok(Some(doc))
            }
            Write::ArrayUnion { field, values, .. } => {
                let mut doc = self.existing(current)?;
                let path = self.path().clone();
                let obj = object_mut(&mut doc, &path)?;
                let slot = obj
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if slot.is_null() {
                    *slot = Value::Array(Vec::new());
                }
                let arr = slot.as_array_mut().ok_or_else(|| {
                    StoreError::InvalidDocument(format!("{}: field {} is not an array", path, field))
                })?;
                for value in values {
                    if !arr.contains(value) {
                        arr.push(value.clone());
                    }
                }
                Ok(Some(doc))
            }
        }
    }

    fn existing(&self, current: Option<Value>) -> Result<Value, StoreError> {
        current.ok_or_else(|| StoreError::NotFound(self.path().to_string()))
    }
}

fn object_mut<'a>(doc: &'a mut Value, path: &DocPath) -> Result<&'a mut Map<String, Value>, StoreError> {
    doc.as_object_mut()
        .ok_or_else(|| StoreError::InvalidDocument(format!("{}: document body is not an object", path)))
}

/// Expected state of a document at commit time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Document must exist (`NotFound` otherwise)
    Exists,
    /// Document must not exist (`AlreadyExists` otherwise)
    Missing,
    /// Document must still be at the version a transaction read;
    /// `None` means it was absent (`Conflict` otherwise)
    Version(Option<u64>),
}

/// Requirement checked before a batch applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub path: DocPath,
    pub expect: Expect,
}

impl Precondition {
    pub fn exists(path: DocPath) -> Self {
        Self { path, expect: Expect::Exists }
    }

    pub fn missing(path: DocPath) -> Self {
        Self { path, expect: Expect::Missing }
    }

    pub fn version(path: DocPath, version: Option<u64>) -> Self {
        Self { path, expect: Expect::Version(version) }
    }

    /// Check against the document's current version
    pub fn check(&self, current: Option<u64>) -> Result<(), StoreError> {
        match (self.expect, current) {
            (Expect::Exists, None) => Err(StoreError::NotFound(self.path.to_string())),
            (Expect::Missing, Some(_)) => Err(StoreError::AlreadyExists(self.path.to_string())),
            (Expect::Version(expected), actual) if expected != actual => {
                Err(StoreError::Conflict(self.path.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Preconditions plus writes, committed as one unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub preconditions: Vec<Precondition>,
    pub writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn precondition(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn write(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

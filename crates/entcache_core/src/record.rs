//! Cached records and their identifiers.

use crate::error::CoreResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Identifier of a server-confirmed record.
///
/// Taken from the record's `id` field. Numeric ids are rendered in decimal so
/// `{"id": 7}` and `{"id": "7"}` refer to the same record.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Reads an ID from a JSON value. Only strings and numbers are IDs.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        Self(id.to_string())
    }
}

impl From<&RecordId> for RecordId {
    fn from(id: &RecordId) -> Self {
        id.clone()
    }
}

/// Transient identifier of an optimistic entry.
///
/// Backed by a random UUID so concurrent optimistic writes never collide.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TempId(Uuid);

impl TempId {
    /// Creates a new random temporary ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a temporary ID from a UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the cache key the optimistic entry is stored under.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempId({})", self.0.simple())
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp_{}", self.0.simple())
    }
}

/// A cached record.
///
/// Wraps the JSON value the server returned. Optimistic records additionally
/// carry the [`TempId`] of the mutation that wrote them; the tag is never
/// serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    value: Value,
    #[serde(skip)]
    optimistic: Option<TempId>,
}

impl Record {
    /// Creates a confirmed record.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            optimistic: None,
        }
    }

    /// Creates an optimistic record tagged with `temp_id`.
    pub fn optimistic(value: Value, temp_id: TempId) -> Self {
        Self {
            value,
            optimistic: Some(temp_id),
        }
    }

    /// Encodes a typed value as a record.
    pub fn encode<T: Serialize>(value: &T) -> CoreResult<Self> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Decodes the record into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(T::deserialize(&self.value)?)
    }

    /// Returns the record's `id` field.
    pub fn id(&self) -> Option<RecordId> {
        self.value.get("id").and_then(RecordId::from_value)
    }

    /// Returns the transient tag, if this is an optimistic record.
    pub fn temp_id(&self) -> Option<TempId> {
        self.optimistic
    }

    /// Returns true if this is an optimistic record.
    pub fn is_optimistic(&self) -> bool {
        self.optimistic.is_some()
    }

    /// Returns the underlying JSON value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the record, returning the JSON value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Returns a field of the record.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.value.get(field)
    }

    /// Shallow-merges the fields of `patch` into this record.
    ///
    /// When either side is not a JSON object the patch replaces the value.
    /// Merging confirms the record: the transient tag is dropped.
    pub fn merge(&mut self, patch: &Value) {
        match (&mut self.value, patch) {
            (Value::Object(target), Value::Object(fields)) => merge_fields(target, fields),
            (target, patch) => *target = patch.clone(),
        }
        self.optimistic = None;
    }

    /// Returns true if this record has the given server ID.
    pub fn has_id(&self, id: &RecordId) -> bool {
        self.id().as_ref() == Some(id)
    }
}

fn merge_fields(target: &mut Map<String, Value>, fields: &Map<String, Value>) {
    for (name, value) in fields {
        target.insert(name.clone(), value.clone());
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

//! Schemaless records and entity type keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Well-known identity field on every record.
pub const ID_FIELD: &str = "id";
/// Well-known creation timestamp field (RFC 3339).
pub const CREATED_FIELD: &str = "created_at";
/// Well-known last-modified timestamp field (RFC 3339).
pub const MODIFIED_FIELD: &str = "modified_at";

/// A symbolic tag identifying a class of domain records (e.g. "customers").
///
/// Used as the namespace key for watermarks, change logs, bindings and
/// schedules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    /// Creates an entity type from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the entity type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A schemaless record: a JSON object keyed by field name.
///
/// Records carry three well-known fields ([`ID_FIELD`], [`CREATED_FIELD`],
/// [`MODIFIED_FIELD`]); everything else is entity-specific. The backing
/// `serde_json::Map` keeps keys sorted, so serializing a record yields a
/// canonical byte sequence suitable for checksumming.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON object as a record. Returns `None` for non-objects.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Returns the underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Gets a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field value, returning `self` for chaining.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Inserts a field value in place.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Returns the record identity, if present as a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Returns the creation timestamp, if present and parseable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_field(CREATED_FIELD)
    }

    /// Returns the last-modified timestamp, if present and parseable.
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_field(MODIFIED_FIELD)
    }

    /// Sets the last-modified timestamp.
    pub fn set_modified_at(&mut self, at: DateTime<Utc>) {
        self.0
            .insert(MODIFIED_FIELD.into(), Value::String(at.to_rfc3339()));
    }

    /// Overlays every field of `other` onto this record.
    pub fn merge_from(&mut self, other: &Record) {
        for (field, value) in other.fields() {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn timestamp_field(&self, field: &str) -> Option<DateTime<Utc>> {
        self.0
            .get(field)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}

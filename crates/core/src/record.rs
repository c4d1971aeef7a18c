//! Record structure for tally pipelines.
//!
//! A record is a stable identity plus a mapping from field name to value.
//! Identities correlate insert/update/remove calls on the same logical entity.

use crate::value::Value;
use alloc::collections::BTreeMap;
use alloc::string::String;

/// Unique identifier for a record.
pub type RecordId = u64;

static NULL: Value = Value::Null;

/// A record fed into a pipeline.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Record {
    /// Identity, fixed for the life of the record.
    id: RecordId,
    /// Field values by name.
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// Creates a record with no fields.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Creates a record from an existing field map.
    pub fn from_fields(id: RecordId, fields: BTreeMap<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Builder-style field assignment.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns the record identity.
    #[inline]
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Gets a field value by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Gets a field value by name, or `Value::Null` when absent.
    #[inline]
    pub fn get_or_null(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&NULL)
    }

    /// Returns true if the field is present.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Sets a field, returning the previous value if any.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Removes a field, returning its value if it was present.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Iterates fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

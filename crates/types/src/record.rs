//! Immutable event records

use crate::errors::{RecordError, Result};
use crate::value::Value;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An ordered mapping of field name to [`Value`] plus the event time used
/// for windowing.
///
/// Records are never mutated in place. Transformations consume a record and
/// build a new one with [`Record::with_field`] / [`Record::without_field`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    event_time: DateTime<Utc>,
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Create an empty record stamped with the given event time
    pub fn new(event_time: DateTime<Utc>) -> Self {
        Self {
            event_time,
            fields: IndexMap::new(),
        }
    }

    /// Create a record from an existing field map
    pub fn from_fields(event_time: DateTime<Utc>, fields: IndexMap<String, Value>) -> Self {
        Self { event_time, fields }
    }

    /// Return a copy of this record with `name` set to `value`.
    ///
    /// An existing field keeps its position; a new field is appended.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Return a copy of this record without `name`
    pub fn without_field(mut self, name: &str) -> Self {
        self.fields.shift_remove(name);
        self
    }

    /// Return a copy of this record with a different event time
    pub fn with_event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = event_time;
        self
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    /// Event time in milliseconds since the epoch
    pub fn event_time_millis(&self) -> i64 {
        self.event_time.timestamp_millis()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Field value, treating a missing field as `Null`
    pub fn value(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(name).unwrap_or(&NULL)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn into_fields(self) -> IndexMap<String, Value> {
        self.fields
    }

    /// Field that must be present; it may be null
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.fields.get(name).ok_or_else(|| RecordError::MissingField {
            field: name.to_string(),
        })
    }

    /// Integer field that must be present and not null
    pub fn require_i64(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            Value::Int(i) => Ok(*i),
            Value::Null => Err(RecordError::NullField {
                field: name.to_string(),
            }),
            other => Err(type_mismatch(name, "int", other)),
        }
    }

    /// String field that must be present and not null
    pub fn require_str(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            Value::Str(s) => Ok(s.as_str()),
            Value::Null => Err(RecordError::NullField {
                field: name.to_string(),
            }),
            other => Err(type_mismatch(name, "string", other)),
        }
    }

    /// Numeric field that must be present; null is returned as `None`
    pub fn optional_f64(&self, name: &str) -> Result<Option<f64>> {
        match self.require(name)? {
            Value::Null => Ok(None),
            other => other
                .as_f64()
                .map(Some)
                .ok_or_else(|| type_mismatch(name, "number", other)),
        }
    }

    /// Timestamp field that must be present; null is returned as `None`
    pub fn optional_timestamp(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        match self.require(name)? {
            Value::Null => Ok(None),
            Value::Timestamp(ts) => Ok(Some(*ts)),
            other => Err(type_mismatch(name, "timestamp", other)),
        }
    }

    /// Render as a flat JSON object. The event time is included under
    /// `_event_time` unless a field already carries that name.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.fields.len() + 1);
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        map.entry("_event_time")
            .or_insert_with(|| Value::Timestamp(self.event_time).to_json());
        serde_json::Value::Object(map)
    }
}

fn type_mismatch(field: &str, expected: &'static str, actual: &Value) -> RecordError {
    RecordError::TypeMismatch {
        field: field.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_field_order_preserved() {
        let record = Record::new(ts())
            .with_field("b", 1i64)
            .with_field("a", 2i64)
            .with_field("b", 3i64);

        let names: Vec<_> = record.field_names().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(record.get("b"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_missing_field_reads_as_null() {
        let record = Record::new(ts());
        assert_eq!(record.value("missing"), &Value::Null);
        assert!(matches!(
            record.require("missing"),
            Err(RecordError::MissingField { .. })
        ));
    }

    #[test]
    fn test_require_typed() {
        let record = Record::new(ts())
            .with_field("user_id", 42i64)
            .with_field("name", "x")
            .with_field("amount", Value::Null);

        assert_eq!(record.require_i64("user_id").unwrap(), 42);
        assert!(matches!(
            record.require_i64("name"),
            Err(RecordError::TypeMismatch { expected: "int", .. })
        ));
        assert_eq!(record.optional_f64("amount").unwrap(), None);
        assert_eq!(record.optional_f64("user_id").unwrap(), Some(42.0));
    }

    #[test]
    fn test_without_field() {
        let record = Record::new(ts()).with_field("a", 1i64).with_field("b", 2i64);
        let record = record.without_field("a");
        assert!(!record.contains("a"));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_to_json() {
        let record = Record::new(ts()).with_field("country", "US");
        let json = record.to_json();
        assert_eq!(json["country"], "US");
        assert_eq!(json["_event_time"], "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_bincode_roundtrip() {
        let record = Record::new(ts())
            .with_field("event_id", "e-1")
            .with_field("amount", 12.5)
            .with_field("quantity", Value::Null);
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: Record = bincode::deserialize(&bytes).unwrap();
        assert_eq!(record, decoded);
    }
}

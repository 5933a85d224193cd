//! Result Serializer Service
//!
//! Turns raw database rows into JSON-safe rows. Pure domain logic: no I/O.

use crate::domain::entities::{QueryResult, Row, SqlValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Number, Value};

/// A row whose values are all safe to hand to a JSON encoder.
///
/// Keys keep the column order of the source row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializedRow {
    entries: Vec<(String, Value)>,
}

impl SerializedRow {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a key, overwriting the value in place if the key exists.
    fn insert(&mut self, key: String, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

impl Serialize for SerializedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Converts database values into JSON values.
///
/// | raw value | JSON |
/// |---|---|
/// | bytes | base64 string |
/// | int8 | decimal string |
/// | NaN / infinite float | null |
/// | array | JSON array, elements converted by these rules |
/// | anything else | unchanged |
pub struct ResultSerializer;

impl ResultSerializer {
    /// Convert a single value.
    pub fn serialize_value(value: SqlValue) -> Value {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(b),
            SqlValue::Integer(i) => Value::from(i),
            SqlValue::BigInt(i) => Value::String(i.to_string()),
            SqlValue::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s),
            SqlValue::Bytes(bytes) => Value::String(BASE64.encode(bytes)),
            SqlValue::Json(v) => v,
            SqlValue::Array(items) => {
                Value::Array(items.into_iter().map(Self::serialize_value).collect())
            }
        }
    }

    /// Convert every column of a row.
    ///
    /// A repeated column name keeps its first position and takes the
    /// last value, matching how a JSON object can hold a key only once.
    pub fn serialize_row(row: Row) -> SerializedRow {
        let mut serialized = SerializedRow::default();
        for (name, value) in row {
            serialized.insert(name, Self::serialize_value(value));
        }
        serialized
    }

    /// Convert all rows, one output row per input row, order preserved.
    pub fn serialize_rows(result: QueryResult) -> Vec<SerializedRow> {
        result.rows.into_iter().map(Self::serialize_row).collect()
    }
}

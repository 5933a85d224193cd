//! Domain Entities - Core gateway objects
//!
//! These entities describe a query as it travels through the gateway:
//! the caller's request, the raw column values read back from the
//! database, and the rows that carry them.

use serde_json::Value;

/// A bind value supplied by the caller.
///
/// The HTTP surface only accepts strings and numbers. Numbers keep their
/// integer-ness so the database adapter can bind them to integer parameters
/// without a lossy round trip through `f64`.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl BindValue {
    /// Convert a JSON value into a bind value.
    ///
    /// Returns None for anything that is not a string or a number.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(BindValue::Text(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(BindValue::Integer(i)),
                None => n.as_f64().map(BindValue::Float),
            },
            _ => None,
        }
    }

    /// Render the value as text, the way PostgreSQL would read it from a
    /// text-format parameter.
    pub fn as_text(&self) -> String {
        match self {
            BindValue::Text(s) => s.clone(),
            BindValue::Integer(i) => i.to_string(),
            BindValue::Float(f) => f.to_string(),
        }
    }
}

/// A query as received from a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Raw SQL text, never empty
    pub query: String,
    /// Positional bind values for `$1`, `$2`, ...
    pub values: Vec<BindValue>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, values: Vec<BindValue>) -> Self {
        Self {
            query: query.into(),
            values,
        }
    }
}

/// A raw column value as decoded from the database.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    /// Integers that always fit the safe JSON range (int2, int4, oid)
    Integer(i64),
    /// 64-bit integers (int8)
    BigInt(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    /// Array column; nested once per extra dimension.
    Array(Vec<SqlValue>),
}

/// A single result row: column names paired with their values, in
/// the order the database returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column to the row.
    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    /// Builder-style variant of [`Row::push`].
    pub fn with(mut self, name: impl Into<String>, value: SqlValue) -> Self {
        self.push(name, value);
        self
    }

    /// Look up the first column with the given name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> &[(String, SqlValue)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl IntoIterator for Row {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

/// The rows produced by one statement execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

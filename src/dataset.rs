//! Dataset identity, row keys and row snapshots

use crate::error::{ReconError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Identifies a comparable tabular source.
///
/// Immutable once constructed: the key column set is guaranteed non-empty and
/// no column is declared twice. Deserialization goes through the same checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDatasetRef", into = "RawDatasetRef")]
pub struct DatasetRef {
    name: String,
    connection: Option<String>,
    key_columns: Vec<String>,
    compare_columns: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct RawDatasetRef {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connection: Option<String>,
    key_columns: Vec<String>,
    #[serde(default)]
    compare_columns: Vec<String>,
}

impl TryFrom<RawDatasetRef> for DatasetRef {
    type Error = ReconError;

    fn try_from(raw: RawDatasetRef) -> Result<Self> {
        let dataset = DatasetRef::new(raw.name, raw.key_columns, raw.compare_columns)?;
        Ok(match raw.connection {
            Some(connection) => dataset.with_connection(connection),
            None => dataset,
        })
    }
}

impl From<DatasetRef> for RawDatasetRef {
    fn from(dataset: DatasetRef) -> Self {
        Self {
            name: dataset.name,
            connection: dataset.connection,
            key_columns: dataset.key_columns,
            compare_columns: dataset.compare_columns,
        }
    }
}

impl DatasetRef {
    pub fn new<N, K, C>(name: N, key_columns: K, compare_columns: C) -> Result<Self>
    where
        N: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let name = name.into();
        let key_columns: Vec<String> = key_columns.into_iter().map(Into::into).collect();
        let compare_columns: Vec<String> = compare_columns.into_iter().map(Into::into).collect();

        if name.trim().is_empty() {
            return Err(ReconError::config("dataset name must not be empty"));
        }
        if key_columns.is_empty() {
            return Err(ReconError::config(format!(
                "dataset '{}' must declare at least one key column",
                name
            )));
        }

        let mut seen = HashSet::new();
        for column in key_columns.iter().chain(compare_columns.iter()) {
            if column.trim().is_empty() {
                return Err(ReconError::config(format!(
                    "dataset '{}' declares an empty column name",
                    name
                )));
            }
            if !seen.insert(column.as_str()) {
                return Err(ReconError::config(format!(
                    "dataset '{}' declares column '{}' more than once",
                    name, column
                )));
            }
        }

        Ok(Self {
            name,
            connection: None,
            key_columns,
            compare_columns,
        })
    }

    /// Attach an opaque connection descriptor. The core never parses it.
    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn compare_columns(&self) -> &[String] {
        &self.compare_columns
    }

    /// Key columns followed by compare columns, in declaration order.
    pub fn all_columns(&self) -> impl Iterator<Item = &String> {
        self.key_columns.iter().chain(self.compare_columns.iter())
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.connection {
            Some(conn) => write!(f, "{}@{}", self.name, conn),
            None => f.write_str(&self.name),
        }
    }
}

/// One component of a row key. Keys are restricted to types with a total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Ordered tuple of key-column values.
///
/// Ordering is lexicographic; a strict prefix sorts before any extension of it,
/// so a one-component boundary `(5)` sits below every `(5, ..)` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(pub Vec<KeyValue>);

impl RowKey {
    pub fn new(parts: Vec<KeyValue>) -> Self {
        Self(parts)
    }

    pub fn int(value: i64) -> Self {
        Self(vec![KeyValue::Int(value)])
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self(vec![KeyValue::Text(value.into())])
    }

    pub fn parts(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Leading component when it is an integer, used for interpolation.
    pub fn leading_int(&self) -> Option<i64> {
        match self.0.first() {
            Some(KeyValue::Int(i)) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// A compare-column cell value as read from a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact decimal in its textual form, e.g. `"99.00"`.
    Decimal(String),
    Text(String),
}

impl Value {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_) | Self::Decimal(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Decimal(d) => f.write_str(d),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// A row as read at comparison time: its key plus compare-column values.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSnapshot {
    pub key: RowKey,
    pub values: IndexMap<String, Value>,
}

impl RowSnapshot {
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            values: IndexMap::new(),
        }
    }

    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

//! Row and value types exchanged with replicas.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Replica-local auto-increment key. Never compared or copied across replicas.
pub const LOCAL_KEY: &str = "id";
/// Replica-independent identifier used to match records across replicas.
pub const STABLE_ID: &str = "uuid";
/// ISO-8601 timestamp refreshed on every local mutation.
pub const LAST_MODIFIED: &str = "last_modified";
/// ISO-8601 tombstone timestamp, NULL while the row is live.
pub const DELETED_AT: &str = "deleted_at";

/// A scalar column value, mirroring the SQLite storage classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }

    /// Total order used for `ORDER BY`: NULL < numbers < text < blobs.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Real(b)) => (*a as f64).total_cmp(b),
            (Value::Real(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Integer(i64::from(b))
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One record of one table in one replica: column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The stable identifier, if the row carries a non-empty textual one.
    pub fn stable_id(&self) -> Option<&str> {
        self.get(STABLE_ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// The last-modified marker, if present and textual.
    pub fn last_modified(&self) -> Option<&str> {
        self.get(LAST_MODIFIED).and_then(Value::as_str)
    }

    /// The tombstone timestamp, if the row has been soft-deleted.
    pub fn deleted_at(&self) -> Option<&str> {
        self.get(DELETED_AT).and_then(Value::as_str)
    }

    pub fn is_tombstoned(&self) -> bool {
        self.get(DELETED_AT).is_some_and(|v| !v.is_null())
    }

    /// Copy of this row without the replica-local auto-key.
    pub fn without_local_key(&self) -> Row {
        let mut row = self.clone();
        row.remove(LOCAL_KEY);
        row
    }

    /// Content equality across replicas: every column except the auto-key.
    /// A column absent on one side compares equal to NULL on the other.
    pub fn same_content(&self, other: &Row) -> bool {
        self.changed_columns(other).is_empty()
    }

    /// Whether this row already holds every value of `other`, ignoring the
    /// auto-key. Columns only this row has are not compared.
    pub fn contains_content(&self, other: &Row) -> bool {
        other
            .iter()
            .filter(|(name, _)| name.as_str() != LOCAL_KEY)
            .all(|(name, value)| self.get(name).unwrap_or(&Value::Null) == value)
    }

    /// Columns (excluding the auto-key) whose values differ between rows.
    pub fn changed_columns(&self, other: &Row) -> Vec<String> {
        let mut names: Vec<&String> = self.columns.keys().chain(other.columns.keys()).collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .filter(|name| name.as_str() != LOCAL_KEY)
            .filter(|name| {
                let ours = self.get(name).unwrap_or(&Value::Null);
                let theirs = other.get(name).unwrap_or(&Value::Null);
                ours != theirs
            })
            .cloned()
            .collect()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

//! Database row representation.

use crate::Result;
use crate::error::{BadTypeError, Error};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Name -> index mapping for O(1) lookup
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query.
///
/// Column metadata is shared via `Arc` so rows of one result set do not
/// duplicate their column names.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let (names, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self::new(names, values)
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Get a typed value by column name.
    pub fn get_named<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::BadType(BadTypeError {
                what: format!("column '{}'", name),
                expected: std::any::type_name::<T>().to_string(),
                actual: Some("missing column".to_string()),
            })
        })?;
        T::try_from(value.clone()).map_err(|e| match e {
            Error::BadType(mut bt) => {
                bt.what = format!("column '{}'", name);
                Error::BadType(bt)
            }
            e => e,
        })
    }

    /// Get a column rendered as text, `None` for NULL or missing columns.
    pub fn get_text(&self, name: &str) -> Option<String> {
        match self.get_by_name(name)? {
            Value::Null => None,
            Value::Text(s) | Value::Decimal(s) => Some(s.clone()),
            Value::Int(v) | Value::Timestamp(v) => Some(v.to_string()),
            Value::Bool(v) => Some(if *v { "1" } else { "0" }.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Json(v) => Some(v.to_string()),
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Extract the columns named `<prefix><column>`, stripping the prefix.
    ///
    /// Returns `None` when no column carries the prefix or every matching
    /// value is NULL.
    pub fn slice(&self, prefix: &str) -> Option<Row> {
        let mut names = Vec::new();
        let mut values = Vec::new();
        for (name, value) in self.iter() {
            if let Some(column) = name.strip_prefix(prefix) {
                names.push(column.to_string());
                values.push(value.clone());
            }
        }
        if values.iter().all(Value::is_null) {
            return None;
        }
        Some(Row::new(names, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_access() {
        let row = Row::from_pairs([("id", Value::from("u1")), ("age", Value::from("42"))]);
        assert_eq!(row.get_named::<String>("id").unwrap(), "u1");
        assert_eq!(row.get_named::<i64>("age").unwrap(), 42);
        assert!(row.get_named::<i64>("missing").is_err());
        assert_eq!(row.get_text("age").as_deref(), Some("42"));
    }

    #[test]
    fn slice_strips_prefix() {
        let row = Row::from_pairs([
            ("scope_1__id", Value::from("1")),
            ("scope_1__name", Value::from("a")),
            ("scope_12__id", Value::Null),
        ]);
        let first = row.slice("scope_1__").unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.get_text("name").as_deref(), Some("a"));
        assert!(row.slice("scope_12__").is_none());
        assert!(row.slice("scope_9__").is_none());
    }
}

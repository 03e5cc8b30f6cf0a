//! In-memory tabular model
//!
//! A [`Table`] is an ordered list of column names plus rows of
//! [`serde_json::Value`] cells. `Value::Null` is the null cell. Every stage of
//! the pipeline (flattening, reconciliation, snapshots, loading) exchanges
//! tables, so the model stays deliberately close to the JSON it comes from:
//! scalar cells keep their JSON type and list/object cells are kept as-is until
//! they are exploded.
//!
//! # Example
//!
//! ```
//! use footy_common::Table;
//! use serde_json::json;
//!
//! let table = Table::from_records(&[
//!     json!({"match_id": 1, "stadium": {"id": 10, "name": "Camp Nou"}}),
//!     json!({"match_id": 2, "referee": null}),
//! ]);
//!
//! assert_eq!(table.columns(), ["match_id", "stadium.id", "stadium.name", "referee"]);
//! assert_eq!(table.len(), 2);
//! assert!(table.cell(1, "stadium.name").unwrap().is_null());
//! ```

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::error::{CommonError, Result};

/// Separator used when nested object keys are flattened into column names.
pub const PATH_SEPARATOR: &str = ".";

/// Ordered columns and rows of JSON cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Value>>,
}

/// Borrowed view of a single row, addressable by column name.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a Table,
    cells: &'a [Value],
}

impl<'a> RowRef<'a> {
    /// Cell for `column`, `None` when the table has no such column.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.table.column_index(column).map(|i| &self.cells[i])
    }

    /// Cell for `column` treating a missing column as null.
    pub fn value(&self, column: &str) -> &'a Value {
        self.get(column).unwrap_or(&Value::Null)
    }

    pub fn cells(&self) -> &'a [Value] {
        self.cells
    }
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for column in columns {
            let column = column.into();
            if table.index.contains_key(&column) {
                return Err(CommonError::DuplicateColumn(column));
            }
            table.index.insert(column.clone(), table.columns.len());
            table.columns.push(column);
        }
        Ok(table)
    }

    /// Create a table from columns and already-built rows.
    pub fn from_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Build a table from JSON records, flattening nested objects.
    ///
    /// Nested object keys become `parent.child` columns, recursively. Lists are
    /// kept as cell values. A key missing from a record yields a null cell.
    /// Records that are not JSON objects are skipped.
    pub fn from_records(records: &[Value]) -> Self {
        let mut table = Self::default();
        let mut flattened = Vec::with_capacity(records.len());

        for record in records {
            let Value::Object(map) = record else {
                continue;
            };
            let mut pairs = Vec::with_capacity(map.len());
            flatten_object("", map, &mut pairs);
            for (key, _) in &pairs {
                if !table.index.contains_key(key) {
                    table.index.insert(key.clone(), table.columns.len());
                    table.columns.push(key.clone());
                }
            }
            flattened.push(pairs);
        }

        for pairs in flattened {
            let mut row = vec![Value::Null; table.columns.len()];
            for (key, value) in pairs {
                if let Some(&i) = table.index.get(&key) {
                    row[i] = value;
                }
            }
            table.rows.push(row);
        }

        table
    }

    /// Concatenate tables vertically over the union of their columns.
    ///
    /// Column order is first-seen order across the inputs; cells for columns a
    /// table lacks are null.
    pub fn concat<I>(tables: I) -> Self
    where
        I: IntoIterator<Item = Table>,
    {
        let mut out = Self::default();
        for table in tables {
            for column in &table.columns {
                out.ensure_column(column);
            }
            let mapping: Vec<usize> = table.columns.iter().map(|c| out.index[c]).collect();
            for row in table.rows {
                let mut new_row = vec![Value::Null; out.columns.len()];
                for (value, &target) in row.into_iter().zip(&mapping) {
                    new_row[target] = value;
                }
                out.rows.push(new_row);
            }
        }
        out
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// Iterate over rows as name-addressable views.
    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |cells| RowRef { table: self, cells })
    }

    /// Row view at `row`.
    pub fn row(&self, row: usize) -> Option<RowRef<'_>> {
        self.rows.get(row).map(|cells| RowRef { table: self, cells })
    }

    /// Append a row; its width must match the column count.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(CommonError::RowWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Cell at (`row`, `column`).
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let i = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[i])
    }

    /// Add a column filled with null if it does not exist yet; returns its index.
    pub fn ensure_column(&mut self, column: &str) -> usize {
        if let Some(&i) = self.index.get(column) {
            return i;
        }
        let i = self.columns.len();
        self.columns.push(column.to_string());
        self.index.insert(column.to_string(), i);
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        i
    }

    /// Add `column` with `values`, replacing the values if it already exists.
    pub fn add_column(&mut self, column: &str, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(CommonError::ColumnLength {
                expected: self.rows.len(),
                actual: values.len(),
            });
        }
        let i = self.ensure_column(column);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[i] = value;
        }
        Ok(())
    }

    /// Remove `column`, returning its values.
    pub fn drop_column(&mut self, column: &str) -> Result<Vec<Value>> {
        let i = self.require(column)?;
        self.columns.remove(i);
        self.rebuild_index();
        Ok(self.rows.iter_mut().map(|r| r.remove(i)).collect())
    }

    /// Rename `from` to `to`. Returns `false` when `from` does not exist.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<bool> {
        let Some(i) = self.column_index(from) else {
            return Ok(false);
        };
        if from == to {
            return Ok(true);
        }
        if self.has_column(to) {
            return Err(CommonError::DuplicateColumn(to.to_string()));
        }
        self.columns[i] = to.to_string();
        self.rebuild_index();
        Ok(true)
    }

    /// Rename every column through `f`.
    pub fn rename_columns<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&str) -> String,
    {
        let renamed: Vec<String> = self.columns.iter().map(|c| f(c)).collect();
        let mut seen = HashSet::with_capacity(renamed.len());
        for column in &renamed {
            if !seen.insert(column.as_str()) {
                return Err(CommonError::DuplicateColumn(column.clone()));
            }
        }
        self.columns = renamed;
        self.rebuild_index();
        Ok(())
    }

    /// Apply `f` to every cell of `column`.
    pub fn map_column<F>(&mut self, column: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&Value) -> Value,
    {
        let i = self.require(column)?;
        for row in &mut self.rows {
            row[i] = f(&row[i]);
        }
        Ok(())
    }

    /// Keep the rows for which `predicate` holds.
    pub fn filter<F>(&self, mut predicate: F) -> Table
    where
        F: FnMut(RowRef<'_>) -> bool,
    {
        let rows = self
            .iter()
            .filter(|row| predicate(*row))
            .map(|row| row.cells.to_vec())
            .collect();
        Table {
            columns: self.columns.clone(),
            index: self.index.clone(),
            rows,
        }
    }

    fn require(&self, column: &str) -> Result<usize> {
        self.column_index(column)
            .ok_or_else(|| CommonError::UnknownColumn(column.to_string()))
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
    }
}

/// Flatten nested objects into `(path, value)` pairs.
///
/// Empty objects contribute no column.
pub fn flatten_object(prefix: &str, map: &Map<String, Value>, out: &mut Vec<(String, Value)>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{PATH_SEPARATOR}{key}")
        };
        match value {
            Value::Object(inner) => flatten_object(&path, inner, out),
            other => out.push((path, other.clone())),
        }
    }
}

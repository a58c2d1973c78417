//! Step payloads: named datasets passed between steps.
//!
//! The orchestration core never looks inside a payload beyond its dataset
//! names and row counts; the step handlers own the contents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Output of one step: a mapping of dataset name to dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    datasets: BTreeMap<String, Dataset>,
}

/// A single dataset inside a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Dataset {
    /// Semi-structured documents keyed by an identifier (raw input)
    Records(BTreeMap<String, Value>),
    /// Column-oriented tabular data
    Table(Table),
}

impl Dataset {
    /// Number of records or rows.
    pub fn len(&self) -> usize {
        match self {
            Self::Records(records) => records.len(),
            Self::Table(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(table) => Some(table),
            Self::Records(_) => None,
        }
    }

    pub fn as_records(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Records(records) => Some(records),
            Self::Table(_) => None,
        }
    }
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.insert(name, dataset);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, dataset: Dataset) {
        self.datasets.insert(name.into(), dataset);
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Dataset> {
        self.datasets.remove(name)
    }

    /// Table dataset by name.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.get(name).and_then(Dataset::as_table)
    }

    /// Records dataset by name.
    pub fn records(&self, name: &str) -> Option<&BTreeMap<String, Value>> {
        self.get(name).and_then(Dataset::as_records)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Dataset)> {
        self.datasets.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Merge `other` into this payload; datasets in `other` win on name clash.
    pub fn merge(&mut self, other: Payload) {
        self.datasets.extend(other.datasets);
    }
}

/// Column-oriented table with JSON cell values.
///
/// Rows always have exactly `columns.len()` cells; absent values are `Null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a table from flat JSON objects. Columns appear in first-seen order.
    pub fn from_objects<'a>(objects: impl IntoIterator<Item = &'a Map<String, Value>>) -> Self {
        let mut table = Self::default();
        for object in objects {
            table.push_object(object);
        }
        table
    }

    /// Append a flat object, widening the schema when new keys appear.
    pub fn push_object(&mut self, object: &Map<String, Value>) {
        for key in object.keys() {
            if self.column_index(key).is_none() {
                self.add_column(key.clone(), Value::Null);
            }
        }
        let row = self
            .columns
            .iter()
            .map(|c| object.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        self.rows.push(row);
    }

    /// Append a row. Short rows are padded with `Null`, long rows truncated.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Add a column, filling existing rows with `fill`.
    pub fn add_column(&mut self, name: impl Into<String>, fill: Value) {
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
    }

    /// Add or replace a column computed from each row.
    pub fn set_column_with<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(&Table, usize) -> Value,
    {
        let values: Vec<Value> = (0..self.len()).map(|i| f(self, i)).collect();
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.add_column(name, Value::Null);
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Vec<Value>] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell by row index and column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Numeric cell, if present and numeric.
    pub fn f64(&self, row: usize, column: &str) -> Option<f64> {
        self.value(row, column).and_then(Value::as_f64)
    }

    /// Cell rendered as a grouping/join key.
    pub fn key(&self, row: usize, column: &str) -> String {
        match self.value(row, column) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// Keep rows where `keep` returns true, returning the rejected rows as a
    /// second table with the same schema.
    pub fn partition<F>(self, mut keep: F) -> (Table, Table)
    where
        F: FnMut(&Table, usize) -> bool,
    {
        let flags: Vec<bool> = (0..self.len()).map(|i| keep(&self, i)).collect();
        let mut kept = Table::new(self.columns.clone());
        let mut rejected = Table::new(self.columns);
        for (row, flag) in self.rows.into_iter().zip(flags) {
            if flag {
                kept.rows.push(row);
            } else {
                rejected.rows.push(row);
            }
        }
        (kept, rejected)
    }

    /// Concatenate tables vertically over the union of their columns.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
        let mut out = Table::default();
        for table in tables {
            for column in &table.columns {
                if out.column_index(column).is_none() {
                    out.add_column(column.clone(), Value::Null);
                }
            }
            let mapping: Vec<usize> = table
                .columns
                .iter()
                .filter_map(|c| out.column_index(c))
                .collect();
            for row in table.rows {
                let mut aligned = vec![Value::Null; out.columns.len()];
                for (value, idx) in row.into_iter().zip(&mapping) {
                    aligned[*idx] = value;
                }
                out.rows.push(aligned);
            }
        }
        out
    }

    /// Inner join on the given key columns.
    ///
    /// Output columns are the left columns followed by the right columns that
    /// are not join keys; other clashing names get `_x` / `_y` suffixes.
    pub fn inner_join(&self, right: &Table, on: &[&str]) -> Table {
        let right_extra: Vec<usize> = (0..right.columns.len())
            .filter(|&i| !on.contains(&right.columns[i].as_str()))
            .collect();

        let mut columns = Vec::with_capacity(self.columns.len() + right_extra.len());
        for column in &self.columns {
            let clashes = !on.contains(&column.as_str())
                && right_extra.iter().any(|&i| &right.columns[i] == column);
            columns.push(if clashes {
                format!("{column}_x")
            } else {
                column.clone()
            });
        }
        for &i in &right_extra {
            let column = &right.columns[i];
            let clashes = self.column_index(column).is_some();
            columns.push(if clashes {
                format!("{column}_y")
            } else {
                column.clone()
            });
        }

        let mut out = Table::new(columns);
        for l in 0..self.len() {
            let left_key: Vec<String> = on.iter().map(|c| self.key(l, c)).collect();
            for r in 0..right.len() {
                let matches = on
                    .iter()
                    .zip(&left_key)
                    .all(|(c, k)| &right.key(r, c) == k);
                if matches {
                    let mut row = self.rows[l].clone();
                    row.extend(right_extra.iter().map(|&i| right.rows[r][i].clone()));
                    out.rows.push(row);
                }
            }
        }
        out
    }
}

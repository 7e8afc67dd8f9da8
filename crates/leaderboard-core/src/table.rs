//! Column-structured results table shared across evaluation stages.
//!
//! Serialized as `{"columns": [...], "data": [[...], ...]}`, the shape the
//! tracking backend stores under `leaderboard_table`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

/// Table shared between the run context and the stage runner.
pub type SharedTable = Arc<Mutex<ResultsTable>>;

/// Errors produced by table construction.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("row has {found} values, table has {expected} columns")]
    RowLength { expected: usize, found: usize },

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("malformed table: {0}")]
    Malformed(String),
}

/// Appendable table of scored rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsTable {
    columns: Vec<String>,
    data: Vec<Vec<Value>>,
}

impl ResultsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with a fixed initial schema.
    pub fn with_columns<I, S>(columns: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for column in columns {
            let column = column.into();
            if table.columns.contains(&column) {
                return Err(TableError::DuplicateColumn(column));
            }
            table.columns.push(column);
        }
        Ok(table)
    }

    /// Parse and validate a serialized table.
    pub fn from_value(value: Value) -> Result<Self, TableError> {
        let table: ResultsTable =
            serde_json::from_value(value).map_err(|e| TableError::Malformed(e.to_string()))?;
        let mut seen = Vec::with_capacity(table.columns.len());
        for column in &table.columns {
            if seen.contains(&column) {
                return Err(TableError::DuplicateColumn(column.clone()));
            }
            seen.push(column);
        }
        for row in &table.data {
            if row.len() != table.columns.len() {
                return Err(TableError::RowLength {
                    expected: table.columns.len(),
                    found: row.len(),
                });
            }
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn column_index(&mut self, name: &str) -> usize {
        if let Some(idx) = self.columns.iter().position(|c| c == name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.data {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }

    /// Append a row keyed by column name.
    ///
    /// Unseen columns extend the schema; earlier rows get `null` there.
    pub fn append_row(&mut self, row: Map<String, Value>) {
        let mut values = vec![Value::Null; self.columns.len()];
        for (name, value) in row {
            let idx = self.column_index(&name);
            if idx >= values.len() {
                values.resize(idx + 1, Value::Null);
            }
            values[idx] = value;
        }
        values.resize(self.columns.len(), Value::Null);
        self.data.push(values);
    }

    /// Append a positional row matching the current schema.
    pub fn append_values(&mut self, values: Vec<Value>) -> Result<(), TableError> {
        if values.len() != self.columns.len() {
            return Err(TableError::RowLength {
                expected: self.columns.len(),
                found: values.len(),
            });
        }
        self.data.push(values);
        Ok(())
    }

    /// Append every row of `other`, aligning by column name.
    pub fn merge(&mut self, other: &ResultsTable) {
        for row in other.rows() {
            self.append_row(row);
        }
        for column in &other.columns {
            self.column_index(column);
        }
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.data.iter().map(|row| &row[idx]).collect())
    }

    /// Row at `index` keyed by column name.
    pub fn row(&self, index: usize) -> Option<Map<String, Value>> {
        let values = self.data.get(index)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect(),
        )
    }

    pub fn rows(&self) -> impl Iterator<Item = Map<String, Value>> + '_ {
        (0..self.data.len()).filter_map(move |i| self.row(i))
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "columns": self.columns,
            "data": self.data,
        })
    }

    pub fn into_shared(self) -> SharedTable {
        Arc::new(Mutex::new(self))
    }
}

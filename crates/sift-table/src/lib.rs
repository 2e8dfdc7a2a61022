#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use sift_types::{TypeError, Value, ValueKind, infer_kind, promote};
use thiserror::Error;

/// Identity a row keeps across filtering and reordering. Fresh tables number
/// rows `0..n`; derived tables carry the ids of the rows they kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub u64);

impl From<u64> for RowId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("column {name:?} has {len} values but the table has {expected} rows")]
    LengthMismatch {
        name: String,
        len: usize,
        expected: usize,
    },
    #[error("duplicate column name: {name:?}")]
    DuplicateColumn { name: String },
    #[error("row id count ({ids}) does not match row count ({rows})")]
    RowIdMismatch { ids: usize, rows: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    kind: ValueKind,
    values: Vec<Value>,
}

impl Column {
    /// Builds a column by inferring the common kind of `values` and widening
    /// each value to it. Mixed kinds outside the numeric lattice fail.
    pub fn from_values(name: impl Into<String>, values: Vec<Value>) -> Result<Self, TableError> {
        let kind = infer_kind(&values)?;
        let values = values
            .into_iter()
            .map(|value| promote(value, kind))
            .collect();
        Ok(Self {
            name: name.into(),
            kind,
            values,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    fn take_positions(&self, positions: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            values: positions.iter().map(|&pos| self.values[pos].clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
    row_ids: Vec<RowId>,
}

impl Table {
    /// Builds a table from columns in the given order, numbering rows `0..n`.
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        let rows = columns.first().map_or(0, Column::len);
        let row_ids = (0..rows as u64).map(RowId).collect();
        Self::with_row_ids(columns, row_ids)
    }

    pub fn with_row_ids(columns: Vec<Column>, row_ids: Vec<RowId>) -> Result<Self, TableError> {
        let expected = columns.first().map_or(0, Column::len);
        for column in &columns {
            if column.len() != expected {
                return Err(TableError::LengthMismatch {
                    name: column.name.clone(),
                    len: column.len(),
                    expected,
                });
            }
        }
        for (idx, column) in columns.iter().enumerate() {
            if columns[..idx].iter().any(|other| other.name == column.name) {
                return Err(TableError::DuplicateColumn {
                    name: column.name.clone(),
                });
            }
        }
        if row_ids.len() != expected {
            return Err(TableError::RowIdMismatch {
                ids: row_ids.len(),
                rows: expected,
            });
        }
        Ok(Self { columns, row_ids })
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.row_ids.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    #[must_use]
    pub fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    /// Builds a table keeping `positions` rows, in the given order. Column
    /// kinds carry over unchanged even when the kept values alone would
    /// re-infer narrower.
    ///
    /// # Panics
    ///
    /// Panics if any position is out of bounds.
    #[must_use]
    pub fn take_positions(&self, positions: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|column| column.take_positions(positions))
                .collect(),
            row_ids: positions.iter().map(|&pos| self.row_ids[pos]).collect(),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return f.write_str("[empty table]");
        }

        let rows = self.row_count();
        let mut widths: Vec<usize> = self.columns.iter().map(|column| column.name.len()).collect();
        let mut cells: Vec<Vec<String>> = Vec::with_capacity(rows);
        for pos in 0..rows {
            let row: Vec<String> = self
                .columns
                .iter()
                .map(|column| column.values[pos].to_string())
                .collect();
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.len());
            }
            cells.push(row);
        }
        let gutter = self
            .row_ids
            .iter()
            .map(|id| id.to_string().len())
            .max()
            .unwrap_or(0);

        write!(f, "{:gutter$}", "")?;
        for (idx, column) in self.columns.iter().enumerate() {
            let width = widths[idx];
            let name = &column.name;
            write!(f, "  {name:>width$}")?;
        }
        for (pos, row) in cells.iter().enumerate() {
            let id = self.row_ids[pos].0;
            write!(f, "\n{id:>gutter$}")?;
            for (idx, cell) in row.iter().enumerate() {
                let width = widths[idx];
                write!(f, "  {cell:>width$}")?;
            }
        }
        Ok(())
    }
}

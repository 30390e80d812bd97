use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Binary,
    Categorical,
}

impl ColumnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Binary => "binary",
            Self::Categorical => "categorical",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Numeric | Self::Binary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Category(String),
}

impl Cell {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Category(_) => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Number(value) => number_label(*value),
            Self::Category(value) => value.clone(),
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Category(value.to_owned())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Category(value)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("duplicate column '{0}' in schema")]
    DuplicateColumn(String),
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    #[error("row has {actual} values but schema declares {expected} columns")]
    RowArity { expected: usize, actual: usize },
    #[error("column '{column}' is declared {expected} but row {row} holds an incompatible value")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        row: usize,
    },
    #[error("binary column '{column}' holds {value} at row {row}, expected 0 or 1")]
    NonBinary {
        column: String,
        value: f64,
        row: usize,
    },
    #[error("column '{column}' holds a non-finite value at row {row}")]
    NonFinite { column: String, row: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "Vec<ColumnSpec>", try_from = "Vec<ColumnSpec>")]
pub struct Schema {
    columns: Vec<ColumnSpec>,
    index: HashMap<String, usize>,
}

impl From<Schema> for Vec<ColumnSpec> {
    fn from(schema: Schema) -> Self {
        schema.columns
    }
}

impl TryFrom<Vec<ColumnSpec>> for Schema {
    type Error = DataError;

    fn try_from(columns: Vec<ColumnSpec>) -> Result<Self, Self::Error> {
        Self::new(columns)
    }
}

impl Schema {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self, DataError> {
        let mut index = HashMap::with_capacity(columns.len());
        for (position, column) in columns.iter().enumerate() {
            if index.insert(column.name.clone(), position).is_some() {
                return Err(DataError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(Self { columns, index })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn kind(&self, name: &str) -> Option<ColumnKind> {
        self.position(name).map(|position| self.columns[position].kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    schema: Schema,
    rows: Vec<Vec<Cell>>,
}

#[derive(Deserialize)]
struct RawDataset {
    schema: Schema,
    rows: Vec<Vec<Cell>>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = DataError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        Self::from_rows(raw.schema, raw.rows)
    }
}

impl Dataset {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn from_rows(schema: Schema, rows: Vec<Vec<Cell>>) -> Result<Self, DataError> {
        let mut dataset = Self::new(schema);
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), DataError> {
        let expected = self.schema.len();
        if row.len() != expected {
            return Err(DataError::RowArity {
                expected,
                actual: row.len(),
            });
        }

        let row_number = self.rows.len();
        for (column, cell) in self.schema.columns().iter().zip(row.iter()) {
            validate_cell(column, cell, row_number)?;
        }

        self.rows.push(row);
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn kind(&self, column: &str) -> Result<ColumnKind, DataError> {
        self.schema
            .kind(column)
            .ok_or_else(|| DataError::UnknownColumn(column.to_owned()))
    }

    pub fn cells<'a>(
        &'a self,
        column: &str,
    ) -> Result<impl Iterator<Item = &'a Cell> + use<'a>, DataError> {
        let position = self
            .schema
            .position(column)
            .ok_or_else(|| DataError::UnknownColumn(column.to_owned()))?;
        Ok(self.rows.iter().map(move |row| &row[position]))
    }

    pub fn numeric_column(&self, column: &str) -> Result<Vec<f64>, DataError> {
        let kind = self.kind(column)?;
        if !kind.is_numeric() {
            return Err(DataError::TypeMismatch {
                column: column.to_owned(),
                expected: ColumnKind::Numeric.as_str(),
                row: 0,
            });
        }
        Ok(self
            .cells(column)?
            .map(|cell| cell.as_f64().unwrap_or(f64::NAN))
            .collect())
    }

    pub fn labels(&self, column: &str) -> Result<Vec<String>, DataError> {
        Ok(self.cells(column)?.map(Cell::label).collect())
    }

    pub fn distinct_labels(&self, column: &str) -> Result<Vec<String>, DataError> {
        if self.kind(column)?.is_numeric() {
            let mut values = self.numeric_column(column)?;
            values.sort_by(f64::total_cmp);
            values.dedup();
            return Ok(values.into_iter().map(number_label).collect());
        }

        let labels: BTreeSet<String> = self.cells(column)?.map(Cell::label).collect();
        Ok(labels.into_iter().collect())
    }
}

fn validate_cell(column: &ColumnSpec, cell: &Cell, row: usize) -> Result<(), DataError> {
    match (column.kind, cell) {
        (ColumnKind::Categorical, Cell::Category(_)) => Ok(()),
        (ColumnKind::Categorical, Cell::Number(value)) if value.is_finite() => Ok(()),
        (ColumnKind::Numeric | ColumnKind::Binary, Cell::Number(value)) if !value.is_finite() => {
            Err(DataError::NonFinite {
                column: column.name.clone(),
                row,
            })
        }
        (ColumnKind::Binary, Cell::Number(value)) if *value != 0.0 && *value != 1.0 => {
            Err(DataError::NonBinary {
                column: column.name.clone(),
                value: *value,
                row,
            })
        }
        (ColumnKind::Numeric | ColumnKind::Binary, Cell::Number(_)) => Ok(()),
        (kind, _) => Err(DataError::TypeMismatch {
            column: column.name.clone(),
            expected: kind.as_str(),
            row,
        }),
    }
}

fn number_label(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

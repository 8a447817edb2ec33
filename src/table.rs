use std::collections::HashSet;
use thiserror::Error;

/// A row of string cells, aligned with the owning table's columns.
pub type OutputRow = Vec<String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("row {row} has {found} cells but the table has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Flat tabular data: an ordered header plus rows of cells.
///
/// Every row has exactly one cell per column. A table with no columns is the
/// "empty store" state used on first run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<OutputRow>,
}

impl Table {
    pub fn empty() -> Self {
        Table::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<OutputRow>) -> Result<Self, ShapeError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(ShapeError::DuplicateColumn(column.clone()));
            }
        }

        let mut table = Table {
            columns,
            rows: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            table.push_row(row)?;
        }

        Ok(table)
    }

    pub fn push_row(&mut self, row: OutputRow) -> Result<(), ShapeError> {
        if row.len() != self.columns.len() {
            return Err(ShapeError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[OutputRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_new_rejects_duplicate_columns() {
        let result = Table::new(cols(&["date_start", "spend", "date_start"]), vec![]);
        assert_eq!(
            result.unwrap_err(),
            ShapeError::DuplicateColumn("date_start".to_string())
        );
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let result = Table::new(
            cols(&["date_start", "spend"]),
            vec![cols(&["2024-01-01", "10"]), cols(&["2024-01-02"])],
        );
        assert_eq!(
            result.unwrap_err(),
            ShapeError::RowWidth {
                row: 1,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_column_index() {
        let table = Table::new(cols(&["date_start", "spend"]), vec![]).unwrap();
        assert_eq!(table.column_index("spend"), Some(1));
        assert_eq!(table.column_index("reach"), None);
        assert!(table.is_empty());
    }
}

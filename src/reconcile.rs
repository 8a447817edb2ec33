use crate::error::Error;
use crate::table::{OutputRow, Table};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashSet;

/// Ordered list of column names that together identify the rows a fetch
/// supersedes, e.g. `["date_start"]` or `["date", "campaign", "platform"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct KeyPolicy {
    fields: Vec<String>,
}

impl KeyPolicy {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn indices(&self, table: &Table) -> Option<Vec<usize>> {
        self.fields
            .iter()
            .map(|field| table.column_index(field))
            .collect()
    }
}

/// Result of merging a fetched batch into the current table.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub table: Table,
    /// Existing rows evicted because the batch carries their key.
    pub replaced: usize,
    /// Batch rows appended.
    pub appended: usize,
}

fn row_key<'a>(row: &'a OutputRow, indices: &[usize]) -> Vec<&'a str> {
    indices.iter().map(|&i| row[i].trim()).collect()
}

/// Merges `batch` into `current`.
///
/// Existing rows whose key appears anywhere in the batch are dropped, the
/// survivors keep their order, and the batch rows are appended in fetch order.
/// An empty batch leaves `current` untouched. Columns present on only one
/// side are carried over, with empty cells where a row lacks them.
pub fn reconcile(current: &Table, batch: &Table, policy: &KeyPolicy) -> Result<Reconciliation, Error> {
    if batch.is_empty() {
        return Ok(Reconciliation {
            table: current.clone(),
            replaced: 0,
            appended: 0,
        });
    }

    if policy.fields().is_empty() {
        return Err(Error::configuration("key policy names no columns"));
    }
    let batch_key = policy.indices(batch).ok_or_else(|| {
        Error::configuration(format!(
            "key columns {:?} are not all present in the fetched batch {:?}",
            policy.fields(),
            batch.columns()
        ))
    })?;

    if current.columns().is_empty() {
        debug!("current table is empty, taking the batch as-is");
        return Ok(Reconciliation {
            table: batch.clone(),
            replaced: 0,
            appended: batch.len(),
        });
    }

    let incoming: HashSet<Vec<&str>> = batch
        .rows()
        .iter()
        .map(|row| row_key(row, &batch_key))
        .collect();
    debug!(
        "batch of {} rows carries {} distinct keys",
        batch.len(),
        incoming.len()
    );

    let current_key = policy.indices(current);
    if current_key.is_none() {
        warn!(
            "existing table lacks key columns {:?}; keeping all {} existing rows",
            policy.fields(),
            current.len()
        );
    }

    let mut columns = current.columns().to_vec();
    for column in batch.columns() {
        if current.column_index(column).is_none() {
            columns.push(column.clone());
        }
    }
    let from_batch: Vec<Option<usize>> = columns.iter().map(|c| batch.column_index(c)).collect();
    let current_width = current.columns().len();

    let mut rows = Vec::with_capacity(current.len() + batch.len());
    let mut replaced = 0;
    for row in current.rows() {
        let superseded = current_key
            .as_ref()
            .is_some_and(|indices| incoming.contains(&row_key(row, indices)));
        if superseded {
            replaced += 1;
            continue;
        }
        let mut merged = row.clone();
        merged.resize(columns.len(), String::new());
        rows.push(merged);
    }

    for row in batch.rows() {
        let merged = from_batch
            .iter()
            .map(|index| index.map(|i| row[i].clone()).unwrap_or_default())
            .collect();
        rows.push(merged);
    }

    debug!(
        "kept {} of {} existing rows across {} columns ({} added by the batch)",
        current.len() - replaced,
        current.len(),
        columns.len(),
        columns.len() - current_width
    );

    let table = Table::new(columns, rows).map_err(|e| Error::schema(e.to_string()))?;

    Ok(Reconciliation {
        table,
        replaced,
        appended: batch.len(),
    })
}

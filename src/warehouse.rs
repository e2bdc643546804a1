//! Warehouse gateway trait
//!
//! This module defines the `Warehouse` trait for creating destination tables and
//! appending rows to them. `BigQueryClient` is the production implementation.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::{EtlError, EtlResult};
use crate::schema::{DataRow, TableRow, TableSchema};

/// A table addressed as `{dataset}.{table}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

impl FromStr for TableRef {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((dataset, table))
                if !dataset.is_empty() && !table.is_empty() && !table.contains('.') =>
            {
                Ok(TableRef::new(dataset, table))
            }
            _ => Err(EtlError::Configuration(format!(
                "table name '{}' is not of the form dataset.table",
                s
            ))),
        }
    }
}

/// Outcome of `Warehouse::ensure_table`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Existing,
    Created,
}

/// Trait for writing data rows to a warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the table with `schema` unless it already exists
    async fn ensure_table(&self, schema: &TableSchema, table: &TableRef) -> EtlResult<TableStatus>;

    /// Append `rows` to the table and wait for the load to finish.
    /// Returns the number of rows loaded.
    async fn load_rows(
        &self,
        schema: &TableSchema,
        rows: Vec<DataRow>,
        table: &TableRef,
    ) -> EtlResult<usize>;
}

#[async_trait]
impl<W: Warehouse + ?Sized> Warehouse for Arc<W> {
    async fn ensure_table(&self, schema: &TableSchema, table: &TableRef) -> EtlResult<TableStatus> {
        (**self).ensure_table(schema, table).await
    }

    async fn load_rows(
        &self,
        schema: &TableSchema,
        rows: Vec<DataRow>,
        table: &TableRef,
    ) -> EtlResult<usize> {
        (**self).load_rows(schema, rows, table).await
    }
}

/// Append typed records to `table`. An empty slice loads nothing and never
/// reaches the warehouse.
pub async fn load_records<W, R>(warehouse: &W, records: &[R], table: &TableRef) -> EtlResult<usize>
where
    W: Warehouse + ?Sized,
    R: TableRow + Sync,
{
    if records.is_empty() {
        info!("No rows to load into {}, skipping", table);
        return Ok(0);
    }

    let rows = records
        .iter()
        .map(|record| record.to_row())
        .collect::<EtlResult<Vec<DataRow>>>()?;

    warehouse.load_rows(&R::SCHEMA, rows, table).await
}

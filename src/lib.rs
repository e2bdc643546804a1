//! Marketplace ETL Library
//!
//! This library fetches listings, currency conversion rates and seller
//! reputations from a marketplace API, flattens the nested JSON responses into
//! tabular records, and appends them to warehouse tables.
//!
//! Components, leaf first:
//! - Batching: `batches`
//! - Flattening: `flatten_items`, `flatten_sellers`
//! - Marketplace client: `MarketplaceClient`
//! - Warehouse gateway: `Warehouse`, `BigQueryClient`
//! - Driver: `Pipeline`

pub mod batching;
pub mod bigquery;
pub mod config;
pub mod error;
pub mod flatten;
pub mod marketplace;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod warehouse;

// Re-export commonly used types
pub use batching::{batches, CHUNK_SIZE};
pub use bigquery::BigQueryClient;
pub use config::{Config, DatabaseConfig, HttpConfig, Secrets, TableKind, TablesConfig};
pub use error::{EtlError, EtlResult};
pub use flatten::{flatten_items, flatten_sellers};
pub use marketplace::MarketplaceClient;
pub use models::{CurrencyRate, ItemRecord, SellerRecord};
pub use pipeline::{run_with_bigquery, Extracted, LoadReport, Pipeline, Stage};
pub use schema::{DataRow, FieldKind, TableRow, TableSchema};
pub use warehouse::{load_records, TableRef, TableStatus, Warehouse};

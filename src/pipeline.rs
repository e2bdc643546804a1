//! Pipeline driver
//!
//! Runs the fixed sequence
//! `INIT → FETCH_CURRENCY → FETCH_PRODUCT_IDS → FETCH_ITEMS → FETCH_SELLERS →
//! ENSURE_TABLES → LOAD_CURRENCY → LOAD_ITEMS → LOAD_SELLERS → DONE`.
//!
//! Fetch stages never stop the run: a missing or failed result is logged and
//! loaded as zero rows. Only a warehouse connection failure or a failed load
//! job ends the run with an error.

use std::fmt;
use std::future::Future;
use tracing::{error, info, warn};

use crate::batching::unique_in_order;
use crate::bigquery::BigQueryClient;
use crate::config::{Config, Secrets, TableKind};
use crate::error::EtlResult;
use crate::marketplace::MarketplaceClient;
use crate::models::{CurrencyRate, ItemRecord, SellerRecord};
use crate::schema::{TableRow, TableSchema};
use crate::warehouse::{load_records, TableRef, TableStatus, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    FetchCurrency,
    FetchProductIds,
    FetchItems,
    FetchSellers,
    EnsureTables,
    LoadCurrency,
    LoadItems,
    LoadSellers,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "INIT",
            Stage::FetchCurrency => "FETCH_CURRENCY",
            Stage::FetchProductIds => "FETCH_PRODUCT_IDS",
            Stage::FetchItems => "FETCH_ITEMS",
            Stage::FetchSellers => "FETCH_SELLERS",
            Stage::EnsureTables => "ENSURE_TABLES",
            Stage::LoadCurrency => "LOAD_CURRENCY",
            Stage::LoadItems => "LOAD_ITEMS",
            Stage::LoadSellers => "LOAD_SELLERS",
            Stage::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Everything fetched from the marketplace in one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub currency: Option<CurrencyRate>,
    pub items: Vec<ItemRecord>,
    pub sellers: Vec<SellerRecord>,
}

/// Rows written per table and the tables created on the way
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub currencies: usize,
    pub items: usize,
    pub sellers: usize,
    pub created_tables: Vec<String>,
}

pub struct Pipeline {
    config: Config,
    marketplace: MarketplaceClient,
}

fn enter(stage: Stage) {
    info!(stage = %stage, "Entering stage {}", stage);
}

/// Collapse a fetch outcome into the data to carry forward
fn settle<T>(stage: Stage, outcome: EtlResult<Option<T>>) -> Option<T> {
    match outcome {
        Ok(Some(data)) => Some(data),
        Ok(None) => {
            warn!(stage = %stage, "Stage {} returned no data, continuing with an empty dataset", stage);
            None
        }
        Err(e) => {
            error!(stage = %stage, "Stage {} failed: {}, continuing with an empty dataset", stage, e);
            None
        }
    }
}

impl Pipeline {
    pub fn new(config: Config, marketplace: MarketplaceClient) -> Self {
        Self { config, marketplace }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn table(&self, kind: TableKind) -> EtlResult<TableRef> {
        self.config.table_name(kind).parse()
    }

    /// Run every fetch stage in order
    pub async fn extract(&self) -> Extracted {
        let config = &self.config;
        enter(Stage::Init);
        info!("Fetching from {}", self.marketplace.host_identifier());

        enter(Stage::FetchCurrency);
        let currency = settle(
            Stage::FetchCurrency,
            self.marketplace
                .fetch_currency_rate(&config.from_currency, &config.to_currency)
                .await,
        );

        enter(Stage::FetchProductIds);
        let product_ids = settle(
            Stage::FetchProductIds,
            self.marketplace
                .search_product_ids(&config.site_id, &config.product_name, &config.product_condition)
                .await,
        )
        .unwrap_or_default();

        enter(Stage::FetchItems);
        let items = if product_ids.is_empty() {
            info!("No product ids to look up, skipping item fetch");
            Vec::new()
        } else {
            settle(
                Stage::FetchItems,
                self.marketplace
                    .fetch_items_bulk(&product_ids, &config.items_attributes)
                    .await,
            )
            .unwrap_or_default()
        };

        enter(Stage::FetchSellers);
        let seller_ids = unique_in_order(items.iter().map(|item| item.seller_id.to_string()));
        let sellers = if seller_ids.is_empty() {
            info!("No seller ids to look up, skipping seller fetch");
            Vec::new()
        } else {
            settle(
                Stage::FetchSellers,
                self.marketplace
                    .fetch_sellers_bulk(&seller_ids, &config.seller_attributes)
                    .await,
            )
            .unwrap_or_default()
        };

        info!(
            "Extracted {} currency rows, {} items, {} sellers",
            usize::from(currency.is_some()),
            items.len(),
            sellers.len()
        );

        Extracted {
            currency,
            items,
            sellers,
        }
    }

    /// Ensure the destination tables and append every dataset
    pub async fn load<W>(&self, warehouse: &W, data: &Extracted) -> EtlResult<LoadReport>
    where
        W: Warehouse + ?Sized,
    {
        let currencies = self.table(TableKind::Currencies)?;
        let items = self.table(TableKind::Items)?;
        let sellers = self.table(TableKind::Sellers)?;

        let mut report = LoadReport::default();

        enter(Stage::EnsureTables);
        let targets: [(&TableSchema, &TableRef); 3] = [
            (&CurrencyRate::SCHEMA, &currencies),
            (&ItemRecord::SCHEMA, &items),
            (&SellerRecord::SCHEMA, &sellers),
        ];
        for (schema, table) in targets {
            if warehouse.ensure_table(schema, table).await? == TableStatus::Created {
                report.created_tables.push(table.to_string());
            }
        }

        enter(Stage::LoadCurrency);
        report.currencies = load_records(warehouse, data.currency.as_slice(), &currencies).await?;

        enter(Stage::LoadItems);
        report.items = load_records(warehouse, &data.items, &items).await?;

        enter(Stage::LoadSellers);
        report.sellers = load_records(warehouse, &data.sellers, &sellers).await?;

        enter(Stage::Done);
        info!(
            "Loaded {} currency rows, {} items, {} sellers",
            report.currencies, report.items, report.sellers
        );
        Ok(report)
    }

    /// Extract, then open the warehouse with `connect` and load.
    ///
    /// `connect` is called once, after all fetches. Its error ends the run.
    pub async fn run<W, F, Fut>(&self, connect: F) -> EtlResult<LoadReport>
    where
        W: Warehouse,
        F: FnOnce() -> Fut,
        Fut: Future<Output = EtlResult<W>>,
    {
        let data = self.extract().await;
        let warehouse = connect().await?;
        self.load(&warehouse, &data).await
    }
}

/// Run the whole pipeline against the marketplace and BigQuery
pub async fn run_with_bigquery(config: Config, secrets: &Secrets) -> EtlResult<LoadReport> {
    let marketplace = MarketplaceClient::from_config(&config, &secrets.api_key)?;
    let pipeline = Pipeline::new(config, marketplace);

    let database = pipeline.config().database.clone();
    let http = pipeline.config().http.clone();
    pipeline
        .run(|| async move { BigQueryClient::connect(&database, &http, &secrets.warehouse_token).await })
        .await
}

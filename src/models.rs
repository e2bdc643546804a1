//! Flat records produced by one pipeline run
//!
//! These are the rows written to the warehouse. They are built once from the
//! marketplace responses and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::schema::{TableRow, TableSchema, CURRENCY_SCHEMA, ITEM_SCHEMA, SELLER_SCHEMA};

/// Conversion rate between two currencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRate {
    pub currency_base: String,
    pub currency_quote: String,
    pub rate: f64,
}

/// One listing, flattened from an item body plus its `shipping` and `sale_terms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub category_id: String,
    pub price: f64,
    pub seller_id: i64,
    pub title: String,
    pub currency_id: String,
    pub free_shipping: bool,
    pub local_pick_up: bool,
    pub logistic_type: Option<String>,
    pub shipping_mode: Option<String>,
    pub warranty_time: Option<String>,
    pub warranty_type: Option<String>,
}

/// A seller and its completed sales count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerRecord {
    pub id: i64,
    pub qty_sales: i64,
}

impl TableRow for CurrencyRate {
    const SCHEMA: TableSchema = CURRENCY_SCHEMA;
}

impl TableRow for ItemRecord {
    const SCHEMA: TableSchema = ITEM_SCHEMA;
}

impl TableRow for SellerRecord {
    const SCHEMA: TableSchema = SELLER_SCHEMA;
}

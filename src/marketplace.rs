//! Marketplace API client
//!
//! This module wraps the read endpoints used by the pipeline: currency
//! conversion, product search and the bulk item/user lookups. Every request
//! carries the static `Authorization` header and is awaited one at a time.
//!
//! A non-200 answer is logged and reported as `Ok(None)`, so the caller can keep
//! going with an empty dataset. Transport and decoding failures are errors.

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use urlencoding::encode;

use crate::batching::{batch_count, batches, CHUNK_SIZE};
use crate::config::{Config, HttpConfig};
use crate::error::{EtlError, EtlResult};
use crate::flatten::{flatten_items, flatten_sellers};
use crate::models::{CurrencyRate, ItemRecord, SellerRecord};

/// Site search response, only the fields the pipeline reads
#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: String,
}

/// HTTP client for the marketplace read API
pub struct MarketplaceClient {
    host: String,
    api_key: String,
    client: reqwest::Client,
}

impl MarketplaceClient {
    /// Create a new client for `host`
    pub fn new(host: &str, http: &HttpConfig, api_key: &str) -> EtlResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(http.timeout_secs));

        if let Some(proxy_url) = &http.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                EtlError::Configuration(format!("invalid proxy {}: {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
            info!("Marketplace client configured with proxy: {}", proxy_url);
        }

        let client = builder
            .build()
            .map_err(|e| EtlError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config, api_key: &str) -> EtlResult<Self> {
        Self::new(&config.host, &config.http, api_key)
    }

    /// Get the host identifier for logging
    pub fn host_identifier(&self) -> &str {
        &self.host
    }

    /// Issue one authorized GET and decode the body on 200.
    ///
    /// Any other status is logged with the endpoint and yields `Ok(None)`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> EtlResult<Option<T>> {
        let url = format!("{}{}", self.host, path);
        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| EtlError::transport(&url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            error!("Error fetching data from {}: status {}", url, status.as_u16());
            return Ok(None);
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|e| EtlError::Decode {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Some(body))
    }

    /// Fetch the conversion rate between two currencies
    ///
    /// Makes a request to: {host}/currency_conversions/search?from={from}&to={to}
    pub async fn fetch_currency_rate(&self, from: &str, to: &str) -> EtlResult<Option<CurrencyRate>> {
        let rate: Option<CurrencyRate> = self
            .get_json("/currency_conversions/search", &[("from", from), ("to", to)])
            .await?;

        if let Some(rate) = &rate {
            info!(
                "Fetched currency rate {} -> {}: {}",
                rate.currency_base, rate.currency_quote, rate.rate
            );
        }
        Ok(rate)
    }

    /// Search a site and return the listing ids in result order
    ///
    /// Makes a request to: {host}/sites/{site_id}/search?q={query}&condition={condition}
    pub async fn search_product_ids(
        &self,
        site_id: &str,
        query: &str,
        condition: &str,
    ) -> EtlResult<Option<Vec<String>>> {
        let path = format!("/sites/{}/search", encode(site_id));
        let response: Option<SearchResponse> = self
            .get_json(&path, &[("q", query), ("condition", condition)])
            .await?;

        Ok(response.map(|search| {
            let ids: Vec<String> = search.results.into_iter().map(|r| r.id).collect();
            info!("Search for '{}' on {} returned {} ids", query, site_id, ids.len());
            ids
        }))
    }

    /// Look up items in batches and flatten them
    ///
    /// Makes one request per batch to: {host}/items?ids={csv}&attributes={attributes}
    pub async fn fetch_items_bulk(
        &self,
        ids: &[String],
        attributes: &str,
    ) -> EtlResult<Option<Vec<ItemRecord>>> {
        self.fetch_bulk("/items", ids, attributes, flatten_items).await
    }

    /// Look up users in batches and flatten them
    ///
    /// Makes one request per batch to: {host}/users?ids={csv}&attributes={attributes}
    pub async fn fetch_sellers_bulk(
        &self,
        ids: &[String],
        attributes: &str,
    ) -> EtlResult<Option<Vec<SellerRecord>>> {
        self.fetch_bulk("/users", ids, attributes, flatten_sellers).await
    }

    /// Shared batched lookup.
    ///
    /// Batches run sequentially and are flattened as they arrive. If any batch
    /// gets a non-200 answer the whole lookup returns `Ok(None)` and rows from
    /// earlier batches are dropped.
    async fn fetch_bulk<T>(
        &self,
        path: &str,
        ids: &[String],
        attributes: &str,
        flatten: fn(&[Value]) -> EtlResult<Vec<T>>,
    ) -> EtlResult<Option<Vec<T>>> {
        let total_batches = batch_count(ids.len(), CHUNK_SIZE);
        info!(
            "Starting bulk lookup of {} ids from {}{} in {} batches",
            ids.len(),
            self.host,
            path,
            total_batches
        );

        let progress_bar = ProgressBar::new(total_batches as u64);
        progress_bar.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} batches - {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );

        let mut records = Vec::with_capacity(ids.len());

        for (batch_idx, batch) in batches(ids, CHUNK_SIZE).enumerate() {
            let csv = batch.join(",");
            let wrappers: Option<Vec<Value>> = self
                .get_json(path, &[("ids", csv.as_str()), ("attributes", attributes)])
                .await?;

            let Some(wrappers) = wrappers else {
                error!(
                    "Bulk lookup on {} aborted at batch {}/{}",
                    path,
                    batch_idx + 1,
                    total_batches
                );
                progress_bar.finish_with_message("Lookup failed!");
                return Ok(None);
            };

            let bodies = successful_wrappers(wrappers);
            let flattened = flatten(&bodies)?;
            progress_bar.set_message(format!("{} records in batch {}", flattened.len(), batch_idx + 1));
            records.extend(flattened);
            progress_bar.inc(1);
        }

        progress_bar.finish_with_message(format!("Completed: {} records", records.len()));
        info!("Completed bulk lookup on {}: {} records", path, records.len());
        Ok(Some(records))
    }
}

/// Keep wrappers whose per-id status is 200 (or not reported)
fn successful_wrappers(wrappers: Vec<Value>) -> Vec<Value> {
    wrappers
        .into_iter()
        .filter(|wrapper| {
            let code = wrapper
                .get("code")
                .or_else(|| wrapper.get("status"))
                .and_then(Value::as_u64);
            match code {
                None | Some(200) => true,
                Some(code) => {
                    let id = wrapper
                        .get("body")
                        .and_then(|b| b.get("id"))
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    warn!("Skipping id {} with per-id status {}", id, code);
                    false
                }
            }
        })
        .collect()
}

//! Configuration module for the marketplace ETL
//!
//! This module defines the configuration structure for the marketplace queries,
//! the HTTP client and the destination warehouse tables. Secrets are not part of
//! the file; they are read from the environment by `Secrets::from_env`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EtlError, EtlResult};

/// Environment variable holding the marketplace `Authorization` header value
pub const API_KEY_VAR: &str = "MELI_API_KEY";
/// Environment variable holding the warehouse OAuth bearer token
pub const WAREHOUSE_TOKEN_VAR: &str = "BIGQUERY_ACCESS_TOKEN";

fn default_seller_attributes() -> String {
    "id,seller_reputation".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_job_timeout_secs() -> u64 {
    300
}

/// HTTP client settings shared by the marketplace and warehouse clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional proxy URL for HTTP requests (e.g., "http://proxy.example.com:8080")
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            proxy: None,
        }
    }
}

/// Destination table names inside the dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesConfig {
    pub currencies: String,
    pub items: String,
    pub sellers: String,
}

/// Warehouse (BigQuery) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Cloud project that owns the dataset
    pub project_id: String,
    pub dataset_id: String,
    pub tables: TablesConfig,
    /// REST base URL, overridable for emulators
    /// (default "https://bigquery.googleapis.com/bigquery/v2")
    #[serde(default)]
    pub api_base: Option<String>,
    /// Upload base URL for load jobs
    /// (default "https://bigquery.googleapis.com/upload/bigquery/v2")
    #[serde(default)]
    pub upload_base: Option<String>,
    /// Dataset location passed when polling jobs (e.g., "US")
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub job_poll_interval_ms: u64,
    /// Give up waiting on a load job after this many seconds
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

/// Which destination table a dataset goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Currencies,
    Items,
    Sellers,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Marketplace site (e.g., "MLA")
    pub site_id: String,
    pub product_name: String,
    pub product_condition: String,
    /// Comma separated attribute list for the bulk item lookup
    pub items_attributes: String,
    /// Comma separated attribute list for the bulk user lookup
    #[serde(default = "default_seller_attributes")]
    pub seller_attributes: String,
    pub from_currency: String,
    pub to_currency: String,
    /// Marketplace API base URL (e.g., "https://api.mercadolibre.com")
    pub host: String,
    #[serde(default)]
    pub http: HttpConfig,
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from a JSON or YAML file, chosen by extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let config: Config = if is_yaml {
            serde_yaml::from_str(&content).context("Failed to parse config YAML")?
        } else {
            serde_json::from_str(&content).context("Failed to parse config JSON")?
        };

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> EtlResult<()> {
        let required = [
            ("site_id", &self.site_id),
            ("product_name", &self.product_name),
            ("product_condition", &self.product_condition),
            ("items_attributes", &self.items_attributes),
            ("seller_attributes", &self.seller_attributes),
            ("from_currency", &self.from_currency),
            ("to_currency", &self.to_currency),
            ("host", &self.host),
            ("database.project_id", &self.database.project_id),
            ("database.dataset_id", &self.database.dataset_id),
            ("database.tables.currencies", &self.database.tables.currencies),
            ("database.tables.items", &self.database.tables.items),
            ("database.tables.sellers", &self.database.tables.sellers),
        ];

        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(EtlError::Configuration(format!("'{}' must not be empty", key)));
            }
        }

        if self.http.timeout_secs == 0 {
            return Err(EtlError::Configuration(
                "'http.timeout_secs' must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Fully qualified `{dataset}.{table}` name for a destination table
    pub fn table_name(&self, kind: TableKind) -> String {
        let tables = &self.database.tables;
        let table = match kind {
            TableKind::Currencies => &tables.currencies,
            TableKind::Items => &tables.items,
            TableKind::Sellers => &tables.sellers,
        };
        format!("{}.{}", self.database.dataset_id, table)
    }
}

/// Credentials supplied through the environment
#[derive(Clone)]
pub struct Secrets {
    pub api_key: String,
    pub warehouse_token: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("api_key", &"<redacted>")
            .field("warehouse_token", &"<redacted>")
            .finish()
    }
}

impl Secrets {
    /// Read both secrets from the process environment
    pub fn from_env() -> EtlResult<Self> {
        Ok(Self {
            api_key: require_env(API_KEY_VAR)?,
            warehouse_token: require_env(WAREHOUSE_TOKEN_VAR)?,
        })
    }
}

fn require_env(name: &str) -> EtlResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(EtlError::Configuration(format!(
            "environment variable {} is not set",
            name
        ))),
    }
}

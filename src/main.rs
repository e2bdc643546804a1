//! Marketplace ETL
//!
//! Fetches currency rates, listings and sellers from the marketplace API once
//! and appends them to the configured BigQuery tables.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use marketplace_etl::{run_with_bigquery, Config, Secrets};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "marketplace-etl")]
#[command(about = "Load marketplace listings, sellers and currency rates into BigQuery", long_about = None)]
struct Args {
    /// Path to the configuration file (JSON, or YAML by extension)
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,

    /// Optional .env file with MELI_API_KEY and BIGQUERY_ACCESS_TOKEN
    #[arg(short, long, value_name = "FILE", env = "ETL_ENV_FILE")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    match &args.env_file {
        Some(path) => {
            dotenv::from_path(path).context(format!("Failed to load env file {:?}", path))?;
        }
        None => {
            // A missing .env is fine; the variables may already be set
            let _ = dotenv::dotenv();
        }
    }

    info!("Loading configuration from {:?}", args.config);
    let config = Config::from_file(&args.config).context("Failed to load configuration")?;
    let secrets = Secrets::from_env().context("Failed to read credentials")?;

    match run_with_bigquery(config, &secrets).await {
        Ok(report) => {
            info!(
                "Pipeline completed: {} currency rows, {} items, {} sellers (created tables: {:?})",
                report.currencies, report.items, report.sellers, report.created_tables
            );
            Ok(())
        }
        Err(e) if e.is_fatal() => {
            error!("Pipeline aborted by the warehouse: {}", e);
            Err(e).context("Pipeline aborted")
        }
        Err(e) => {
            error!("Pipeline failed before loading finished: {}", e);
            Err(e).context("Pipeline failed")
        }
    }
}

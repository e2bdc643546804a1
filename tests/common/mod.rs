//! Shared helpers for integration tests: in-process mock servers and configs.

#![allow(dead_code)]

use axum::Router;
use marketplace_etl::{Config, DatabaseConfig, HttpConfig, TablesConfig};
use tokio::net::TcpListener;

/// Bind an ephemeral local port and return the listener with its base URL
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (listener, base)
}

/// Serve `app` on `listener` in the background
pub fn serve(listener: TcpListener, app: Router) {
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

pub fn database_config(base: &str) -> DatabaseConfig {
    DatabaseConfig {
        project_id: "test-project".to_string(),
        dataset_id: "meli".to_string(),
        tables: TablesConfig {
            currencies: "currencies".to_string(),
            items: "items".to_string(),
            sellers: "sellers".to_string(),
        },
        api_base: Some(format!("{}/bigquery/v2", base)),
        upload_base: Some(format!("{}/upload/bigquery/v2", base)),
        location: None,
        job_poll_interval_ms: 10,
        job_timeout_secs: 5,
    }
}

pub fn http_config() -> HttpConfig {
    HttpConfig {
        timeout_secs: 5,
        proxy: None,
    }
}

pub fn config(marketplace_host: &str) -> Config {
    Config {
        site_id: "MLA".to_string(),
        product_name: "chromecast".to_string(),
        product_condition: "new".to_string(),
        items_attributes: "id,price,category_id,title,seller_id,currency_id,shipping,sale_terms".to_string(),
        seller_attributes: "id,seller_reputation".to_string(),
        from_currency: "ARS".to_string(),
        to_currency: "USD".to_string(),
        host: marketplace_host.to_string(),
        http: http_config(),
        database: database_config("http://127.0.0.1:9"),
    }
}

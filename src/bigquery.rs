//! BigQuery warehouse client
//!
//! Implements `Warehouse` over the BigQuery v2 REST API:
//! - connection probe with a bounded number of immediate retries
//! - table lookup and creation from a static `TableSchema`
//! - append loads: rows are encoded to Parquet, sent through a resumable upload
//!   session, and the resulting load job is polled until it finishes
//!
//! Authentication is a static OAuth bearer token.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::{DatabaseConfig, HttpConfig};
use crate::error::{EtlError, EtlResult};
use crate::schema::{encode_parquet, DataRow, TableSchema};
use crate::warehouse::{TableRef, TableStatus, Warehouse};

pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_UPLOAD_BASE: &str = "https://bigquery.googleapis.com/upload/bigquery/v2";

/// Retries after the first failed connection attempt (4 tries in total)
pub const MAX_CONNECT_RETRIES: u32 = 3;

#[derive(Debug, Deserialize)]
struct JobResource {
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (Some(text), None) | (None, Some(text)) => text.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

/// BigQuery REST client bound to one project
pub struct BigQueryClient {
    client: reqwest::Client,
    token: String,
    project_id: String,
    api_base: String,
    upload_base: String,
    location: Option<String>,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl BigQueryClient {
    /// Connect to the warehouse, retrying immediately up to `MAX_CONNECT_RETRIES` times.
    ///
    /// Each attempt builds an HTTP client and probes the configured dataset.
    /// Exhausting every attempt is a `Connection` error.
    pub async fn connect(config: &DatabaseConfig, http: &HttpConfig, token: &str) -> EtlResult<Self> {
        let mut last_error = String::new();

        for attempt in 0..=MAX_CONNECT_RETRIES {
            match Self::try_connect(config, http, token).await {
                Ok(client) => {
                    info!(
                        "Connected to BigQuery project {} (dataset {})",
                        config.project_id, config.dataset_id
                    );
                    return Ok(client);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < MAX_CONNECT_RETRIES {
                        info!(
                            "Error connecting to BigQuery, retrying... ({}/{}): {}",
                            attempt + 1,
                            MAX_CONNECT_RETRIES,
                            e
                        );
                    }
                }
            }
        }

        error!("Could not connect to BigQuery after several attempts: {}", last_error);
        Err(EtlError::Connection {
            attempts: MAX_CONNECT_RETRIES + 1,
            reason: last_error,
        })
    }

    async fn try_connect(config: &DatabaseConfig, http: &HttpConfig, token: &str) -> EtlResult<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(http.timeout_secs));
        if let Some(proxy_url) = &http.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                EtlError::Configuration(format!("invalid proxy {}: {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| EtlError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        let warehouse = Self {
            client,
            token: token.to_string(),
            project_id: config.project_id.clone(),
            api_base: config
                .api_base
                .as_deref()
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            upload_base: config
                .upload_base
                .as_deref()
                .unwrap_or(DEFAULT_UPLOAD_BASE)
                .trim_end_matches('/')
                .to_string(),
            location: config.location.clone(),
            poll_interval: Duration::from_millis(config.job_poll_interval_ms),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
        };

        warehouse.probe_dataset(&config.dataset_id).await?;
        Ok(warehouse)
    }

    async fn probe_dataset(&self, dataset_id: &str) -> EtlResult<()> {
        let url = format!("{}/projects/{}/datasets/{}", self.api_base, self.project_id, dataset_id);
        debug!("Probing dataset: {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| EtlError::transport(&url, e))?;

        if !response.status().is_success() {
            return Err(EtlError::Request {
                endpoint: url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn table_reference(&self, table: &TableRef) -> Value {
        json!({
            "projectId": self.project_id,
            "datasetId": table.dataset,
            "tableId": table.table,
        })
    }

    async fn create_table(&self, schema: &TableSchema, table: &TableRef) -> EtlResult<TableStatus> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables",
            self.api_base, self.project_id, table.dataset
        );
        let body = json!({
            "tableReference": self.table_reference(table),
            "schema": schema.to_warehouse_json(),
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| EtlError::transport(&url, e))?;

        let status = response.status();
        if status.is_success() {
            info!("The table {} has been created.", table);
            Ok(TableStatus::Created)
        } else if status == StatusCode::CONFLICT {
            info!("The table {} was created concurrently, treating as existing.", table);
            Ok(TableStatus::Existing)
        } else {
            error!("Failed to create table {}: status {}", table, status.as_u16());
            Err(EtlError::Request {
                endpoint: url,
                status: status.as_u16(),
            })
        }
    }

    fn job_id(table: &TableRef) -> String {
        let clean: String = table
            .table
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        format!("etl_{}_{}", clean, Utc::now().format("%Y%m%d%H%M%S%6f"))
    }

    /// Open a resumable upload session for a load job and return its upload URL
    async fn start_load_job(&self, schema: &TableSchema, table: &TableRef, job_id: &str) -> EtlResult<String> {
        let url = format!("{}/projects/{}/jobs", self.upload_base, self.project_id);

        let mut job_reference = json!({
            "projectId": self.project_id,
            "jobId": job_id,
        });
        if let Some(location) = &self.location {
            job_reference["location"] = json!(location);
        }

        let job = json!({
            "jobReference": job_reference,
            "configuration": {
                "load": {
                    "destinationTable": self.table_reference(table),
                    "schema": schema.to_warehouse_json(),
                    "sourceFormat": "PARQUET",
                    "writeDisposition": "WRITE_APPEND",
                    "createDisposition": "CREATE_NEVER",
                }
            }
        });

        let response = self
            .client
            .post(&url)
            .query(&[("uploadType", "resumable")])
            .bearer_auth(&self.token)
            .header("X-Upload-Content-Type", "application/octet-stream")
            .json(&job)
            .send()
            .await
            .map_err(|e| load_error(table, format!("failed to start load job: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(load_error(
                table,
                format!("starting load job at {} returned status {}", url, status.as_u16()),
            ));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| load_error(table, "upload session has no Location header"))
    }

    async fn upload(&self, session_url: &str, data: Vec<u8>, table: &TableRef) -> EtlResult<JobResource> {
        let size = data.len();
        let response = self
            .client
            .put(session_url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| load_error(table, format!("upload failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(load_error(
                table,
                format!("upload of {} bytes returned status {}", size, status.as_u16()),
            ));
        }

        debug!("Uploaded {} bytes of parquet for {}", size, table);
        response
            .json::<JobResource>()
            .await
            .map_err(|e| load_error(table, format!("unreadable job resource: {}", e)))
    }

    async fn get_job(&self, job_id: &str, table: &TableRef) -> EtlResult<JobResource> {
        let url = format!("{}/projects/{}/jobs/{}", self.api_base, self.project_id, job_id);

        let mut request = self.client.get(&url).bearer_auth(&self.token);
        if let Some(location) = &self.location {
            request = request.query(&[("location", location.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| load_error(table, format!("polling job {} failed: {}", job_id, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(load_error(
                table,
                format!("polling job {} returned status {}", job_id, status.as_u16()),
            ));
        }

        response
            .json::<JobResource>()
            .await
            .map_err(|e| load_error(table, format!("unreadable job resource: {}", e)))
    }

    /// Block until the job reports DONE, then surface its error result if any
    async fn wait_for_job(&self, job_id: &str, first: JobResource, table: &TableRef) -> EtlResult<()> {
        let started = Instant::now();
        let mut job = first;

        loop {
            if let Some(status) = &job.status {
                if status.state == "DONE" {
                    return match &status.error_result {
                        Some(err) => Err(load_error(table, err.describe())),
                        None => Ok(()),
                    };
                }
                debug!("Job {} is {}", job_id, status.state);
            }

            if started.elapsed() >= self.job_timeout {
                return Err(load_error(
                    table,
                    format!("job {} did not finish within {:?}", job_id, self.job_timeout),
                ));
            }

            tokio::time::sleep(self.poll_interval).await;
            job = self.get_job(job_id, table).await?;
        }
    }
}

fn load_error(table: &TableRef, reason: impl Into<String>) -> EtlError {
    EtlError::Load {
        table: table.to_string(),
        reason: reason.into(),
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn ensure_table(&self, schema: &TableSchema, table: &TableRef) -> EtlResult<TableStatus> {
        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.api_base, self.project_id, table.dataset, table.table
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| EtlError::transport(&url, e))?;

        match response.status() {
            status if status.is_success() => {
                info!("The table {} already exists.", table);
                Ok(TableStatus::Existing)
            }
            StatusCode::NOT_FOUND => self.create_table(schema, table).await,
            status => {
                error!("Failed to look up table {}: status {}", table, status.as_u16());
                Err(EtlError::Request {
                    endpoint: url,
                    status: status.as_u16(),
                })
            }
        }
    }

    async fn load_rows(
        &self,
        schema: &TableSchema,
        rows: Vec<DataRow>,
        table: &TableRef,
    ) -> EtlResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let count = rows.len();
        let data = encode_parquet(schema, &rows)?;
        let job_id = Self::job_id(table);
        info!("Loading {} rows ({} bytes) into {} as job {}", count, data.len(), table, job_id);

        let session_url = self.start_load_job(schema, table, &job_id).await?;
        let job = self.upload(&session_url, data, table).await?;
        self.wait_for_job(&job_id, job, table).await?;

        info!("Data uploaded to BigQuery in the table {}.", table);
        Ok(count)
    }
}

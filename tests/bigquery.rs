//! BigQuery gateway tests against an in-process mock of the REST API.

mod common;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use marketplace_etl::{
    load_records, BigQueryClient, CurrencyRate, DatabaseConfig, EtlError, SellerRecord, TableRef, TableStatus,
    Warehouse,
};
use marketplace_etl::schema::ITEM_SCHEMA;

const TOKEN: &str = "ya29.test";

#[derive(Default)]
struct MockBigQuery {
    base: String,
    /// Probes answered with 500 before the dataset becomes reachable
    failing_probes: usize,
    probes: AtomicUsize,
    /// Forced status for table lookups instead of 200/404
    lookup_status: Option<u16>,
    tables: Mutex<HashSet<String>>,
    created_schemas: Mutex<HashMap<String, Value>>,
    creates: AtomicUsize,
    jobs: Mutex<Vec<Value>>,
    uploads: Mutex<Vec<Bytes>>,
    polls: AtomicUsize,
    job_error: Option<String>,
    /// Keep every polled job RUNNING
    job_never_done: bool,
    /// Forced status for opening the upload session
    start_status: Option<u16>,
    /// Forced status for the upload itself
    upload_status: Option<u16>,
    unauthorized: AtomicUsize,
}

impl MockBigQuery {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", TOKEN);
        let ok = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some(expected.as_str());
        if !ok {
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
        }
        ok
    }
}

type Shared = State<Arc<MockBigQuery>>;

async fn get_dataset(State(state): Shared, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let probe = state.probes.fetch_add(1, Ordering::SeqCst);
    if probe < state.failing_probes {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({"kind": "bigquery#dataset"})).into_response()
}

async fn get_table(
    State(state): Shared,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = state.lookup_status {
        return StatusCode::from_u16(status).unwrap().into_response();
    }
    let name = format!("{}.{}", params["dataset"], params["table"]);
    if state.tables.lock().unwrap().contains(&name) {
        Json(json!({"id": name})).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn insert_table(
    State(state): Shared,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let table_id = body["tableReference"]["tableId"].as_str().unwrap().to_string();
    let name = format!("{}.{}", params["dataset"], table_id);

    if !state.tables.lock().unwrap().insert(name.clone()) {
        return StatusCode::CONFLICT.into_response();
    }
    state.creates.fetch_add(1, Ordering::SeqCst);
    state.created_schemas.lock().unwrap().insert(name, body["schema"].clone());
    Json(body).into_response()
}

async fn start_job(State(state): Shared, headers: HeaderMap, Json(job): Json<Value>) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = state.start_status {
        return StatusCode::from_u16(status).unwrap().into_response();
    }
    let session = {
        let mut jobs = state.jobs.lock().unwrap();
        jobs.push(job);
        jobs.len()
    };
    let location = format!("{}/upload/session/{}", state.base, session);
    (StatusCode::OK, [(header::LOCATION, location)]).into_response()
}

async fn upload(State(state): Shared, headers: HeaderMap, body: Bytes) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = state.upload_status {
        return StatusCode::from_u16(status).unwrap().into_response();
    }
    state.uploads.lock().unwrap().push(body);
    Json(json!({"status": {"state": "RUNNING"}})).into_response()
}

async fn get_job(State(state): Shared, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let poll = state.polls.fetch_add(1, Ordering::SeqCst);
    if poll == 0 || state.job_never_done {
        return Json(json!({"status": {"state": "RUNNING"}})).into_response();
    }
    match &state.job_error {
        Some(message) => Json(json!({
            "status": {"state": "DONE", "errorResult": {"reason": "invalid", "message": message}}
        }))
        .into_response(),
        None => Json(json!({"status": {"state": "DONE"}})).into_response(),
    }
}

async fn spawn(mut state: MockBigQuery) -> (String, Arc<MockBigQuery>) {
    let (listener, base) = common::bind().await;
    state.base = base.clone();
    let state = Arc::new(state);

    let app = Router::new()
        .route("/bigquery/v2/projects/:project/datasets/:dataset", get(get_dataset))
        .route("/bigquery/v2/projects/:project/datasets/:dataset/tables", post(insert_table))
        .route("/bigquery/v2/projects/:project/datasets/:dataset/tables/:table", get(get_table))
        .route("/bigquery/v2/projects/:project/jobs/:job", get(get_job))
        .route("/upload/bigquery/v2/projects/:project/jobs", post(start_job))
        .route("/upload/session/:session", put(upload))
        .with_state(state.clone());

    common::serve(listener, app);
    (base, state)
}

async fn connect(base: &str) -> Result<BigQueryClient, EtlError> {
    connect_with(common::database_config(base)).await
}

async fn connect_with(config: DatabaseConfig) -> Result<BigQueryClient, EtlError> {
    BigQueryClient::connect(&config, &common::http_config(), TOKEN).await
}

fn one_rate() -> Vec<CurrencyRate> {
    vec![CurrencyRate {
        currency_base: "ARS".to_string(),
        currency_quote: "USD".to_string(),
        rate: 0.0012,
    }]
}

#[tokio::test]
async fn test_connect_retries_until_reachable() {
    let (base, state) = spawn(MockBigQuery {
        failing_probes: 2,
        ..Default::default()
    })
    .await;

    let client = connect(&base).await.unwrap();
    assert_eq!(client.project_id(), "test-project");
    assert_eq!(state.probes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_connect_gives_up_after_four_attempts() {
    let (base, state) = spawn(MockBigQuery {
        failing_probes: usize::MAX,
        ..Default::default()
    })
    .await;

    let err = connect(&base).await.err().expect("connection must fail");
    assert!(matches!(err, EtlError::Connection { attempts: 4, .. }));
    assert!(err.is_fatal());
    assert_eq!(state.probes.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_ensure_table_is_idempotent() {
    let (base, state) = spawn(MockBigQuery::default()).await;
    let client = connect(&base).await.unwrap();
    let table = TableRef::new("meli", "items");

    assert_eq!(client.ensure_table(&ITEM_SCHEMA, &table).await.unwrap(), TableStatus::Created);
    assert_eq!(client.ensure_table(&ITEM_SCHEMA, &table).await.unwrap(), TableStatus::Existing);
    assert_eq!(state.creates.load(Ordering::SeqCst), 1);

    let schemas = state.created_schemas.lock().unwrap();
    let fields = schemas["meli.items"]["fields"].as_array().unwrap();
    let names: Vec<&str> = fields.iter().map(|f| f["name"].as_str().unwrap()).collect();
    assert_eq!(names, ITEM_SCHEMA.field_names());
    assert_eq!(fields[2]["type"], "INTEGER");
}

#[tokio::test]
async fn test_ensure_table_propagates_lookup_errors() {
    let (base, state) = spawn(MockBigQuery {
        lookup_status: Some(403),
        ..Default::default()
    })
    .await;
    let client = connect(&base).await.unwrap();

    let err = client
        .ensure_table(&ITEM_SCHEMA, &TableRef::new("meli", "items"))
        .await
        .unwrap_err();
    assert!(matches!(err, EtlError::Request { status: 403, .. }));
    assert_eq!(state.creates.load(Ordering::SeqCst), 0, "a failed lookup must not trigger a create");
}

#[tokio::test]
async fn test_conflict_on_create_counts_as_existing() {
    let (base, state) = spawn(MockBigQuery {
        lookup_status: Some(404),
        tables: Mutex::new(HashSet::from(["meli.items".to_string()])),
        ..Default::default()
    })
    .await;
    let client = connect(&base).await.unwrap();

    let status = client
        .ensure_table(&ITEM_SCHEMA, &TableRef::new("meli", "items"))
        .await
        .unwrap();
    assert_eq!(status, TableStatus::Existing);
    assert_eq!(state.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_load_uploads_parquet_and_waits_for_job() {
    let (base, state) = spawn(MockBigQuery::default()).await;
    let client = connect(&base).await.unwrap();
    let table = TableRef::new("meli", "currencies");

    let loaded = load_records(&client, &one_rate(), &table).await.unwrap();
    assert_eq!(loaded, 1);

    let jobs = state.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    let load = &jobs[0]["configuration"]["load"];
    assert_eq!(load["sourceFormat"], "PARQUET");
    assert_eq!(load["writeDisposition"], "WRITE_APPEND");
    assert_eq!(load["destinationTable"]["tableId"], "currencies");
    assert_eq!(load["destinationTable"]["datasetId"], "meli");

    let uploads = state.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].starts_with(b"PAR1"));
    assert!(state.polls.load(Ordering::SeqCst) >= 2);
    assert_eq!(state.unauthorized.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_load_job_is_a_load_error() {
    let (base, _state) = spawn(MockBigQuery {
        job_error: Some("Provided schema does not match".to_string()),
        ..Default::default()
    })
    .await;
    let client = connect(&base).await.unwrap();
    let table = TableRef::new("meli", "sellers");

    let sellers = vec![SellerRecord { id: 7, qty_sales: 12 }];
    let err = load_records(&client, &sellers, &table).await.unwrap_err();

    match err {
        EtlError::Load { table, reason } => {
            assert_eq!(table, "meli.sellers");
            assert!(reason.contains("Provided schema does not match"));
        }
        other => panic!("expected Load error, got {}", other),
    }
}

#[tokio::test]
async fn test_empty_load_never_contacts_warehouse() {
    let (base, state) = spawn(MockBigQuery::default()).await;
    let client = connect(&base).await.unwrap();

    let none: Vec<SellerRecord> = Vec::new();
    let loaded = load_records(&client, &none, &TableRef::new("meli", "sellers")).await.unwrap();

    assert_eq!(loaded, 0);
    assert!(state.jobs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unfinished_job_times_out_as_load_error() {
    let (base, state) = spawn(MockBigQuery {
        job_never_done: true,
        ..Default::default()
    })
    .await;
    let mut config = common::database_config(&base);
    config.job_timeout_secs = 1;
    let client = connect_with(config).await.unwrap();

    let err = load_records(&client, &one_rate(), &TableRef::new("meli", "currencies"))
        .await
        .unwrap_err();

    match err {
        EtlError::Load { table, reason } => {
            assert_eq!(table, "meli.currencies");
            assert!(reason.contains("did not finish"), "unexpected reason: {}", reason);
        }
        other => panic!("expected Load error, got {}", other),
    }
    assert!(state.polls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_rejected_upload_session_is_a_load_error() {
    let (base, state) = spawn(MockBigQuery {
        start_status: Some(403),
        ..Default::default()
    })
    .await;
    let client = connect(&base).await.unwrap();

    let err = load_records(&client, &one_rate(), &TableRef::new("meli", "currencies"))
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::Load { ref reason, .. } if reason.contains("403")));
    assert!(state.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_upload_is_a_load_error() {
    let (base, state) = spawn(MockBigQuery {
        upload_status: Some(500),
        ..Default::default()
    })
    .await;
    let client = connect(&base).await.unwrap();

    let err = load_records(&client, &one_rate(), &TableRef::new("meli", "currencies"))
        .await
        .unwrap_err();

    assert!(matches!(err, EtlError::Load { ref reason, .. } if reason.contains("500")));
    assert_eq!(state.jobs.lock().unwrap().len(), 1);
    assert_eq!(state.polls.load(Ordering::SeqCst), 0);
}

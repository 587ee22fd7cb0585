//! Pipeline against a mocked Google Sheets API.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use shelfscan_engine::{BackendConfig, Pipeline, SheetsInventory, TrackingConfig};
use shelfscan_models::{BoundingBox, Detection, PriorityTier};
use shelfscan_sheets::{RetryConfig, SheetsClient, SheetsConfig, TabNames};
use tokio::sync::watch;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> SheetsClient {
    let config = SheetsConfig {
        spreadsheet_id: "sid".to_string(),
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
        tabs: TabNames::default(),
    };
    SheetsClient::with_static_token(config, "test-token").unwrap()
}

fn values(rows: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "values": rows }))
}

async fn mount_spreadsheet(server: &MockServer, inventory_headers: Value) {
    Mock::given(method("GET"))
        .and(path("/sid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sheets": [
                {"properties": {"sheetId": 0, "title": "Inventario"}},
                {"properties": {"sheetId": 5, "title": "Bitacora"}},
                {"properties": {"sheetId": 6, "title": "Sinonimos"}}
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/sid/values/%27Inventario%27%211%3A1$"))
        .respond_with(values(json!([inventory_headers])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/sid/values/%27Bitacora%27%211%3A1$"))
        .respond_with(values(json!([[
            "timestamp", "item_id", "name", "delta_qty", "new_qty", "event", "source", "payload_id", "note"
        ]])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/sid/values/%27Sinonimos%27%211%3A1$"))
        .respond_with(values(json!([["term", "item_id", "category"]])))
        .mount(server)
        .await;
}

async fn appended_rows(server: &MockServer, tab: &str) -> Vec<Value> {
    let suffix = format!("%27{}%27%21A1:append", tab);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.to_string() == "POST" && r.url.path().ends_with(&suffix))
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["values"][0].clone()
        })
        .collect()
}

fn donut() -> Detection {
    Detection::new("donut", "postre", 0.8, BoundingBox::new(0, 0, 30, 30), PriorityTier::High)
}

#[tokio::test]
async fn test_confirmed_entity_is_appended_with_synonyms() {
    let server = MockServer::start().await;
    mount_spreadsheet(
        &server,
        json!(["item_id", "nombre", "categoria", "confianza", "cantidad", "actualizado", "nota"]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/sid/values/%27(Inventario|Sinonimos)%27%21A1:append$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/sid/values/%27Sinonimos%27%21A%3AC$"))
        .respond_with(values(json!([["term", "item_id", "category"]])))
        .mount(&server)
        .await;

    let backend = SheetsInventory::connect(client(&server)).await.unwrap();
    let tracking = TrackingConfig {
        min_frames_for_registration: 3,
        ..TrackingConfig::default()
    };
    let backend_config = BackendConfig {
        call_spacing: Duration::ZERO,
        ..BackendConfig::default()
    };
    let (_tx, shutdown) = watch::channel(false);
    let mut pipeline = Pipeline::with_backend(tracking, Arc::new(backend), &backend_config, shutdown);

    for _ in 0..3 {
        pipeline.process_frame(&[donut(), donut()]).await;
    }
    pipeline.settle().await;
    let summary = pipeline.finish().await;
    assert_eq!(summary.registered, 1);

    let inventory = appended_rows(&server, "Inventario").await;
    assert_eq!(inventory.len(), 1);
    let row = &inventory[0];
    let item_id = row[0].as_str().unwrap();
    assert!(item_id.starts_with("DET_"));
    assert_eq!(row[1], "galleta (tipo donut)");
    assert_eq!(row[2], "postre");
    assert_eq!(row[3], "0.80");
    assert_eq!(row[4], "2");
    assert_eq!(
        summary.entities[0].item_id.as_ref().map(|id| id.as_str()),
        Some(item_id)
    );

    let synonyms = appended_rows(&server, "Sinonimos").await;
    let terms: Vec<&str> = synonyms.iter().filter_map(|r| r[0].as_str()).collect();
    for expected in ["galleta", "cookie", "dulce"] {
        assert!(terms.contains(&expected), "missing synonym {}", expected);
    }
    assert!(synonyms.iter().all(|r| r[1] == item_id));
}

#[tokio::test]
async fn test_connect_retries_through_unavailable_api() {
    let server = MockServer::start().await;
    // Exhausts the client's own retry once, so the first connect fails transiently
    Mock::given(method("GET"))
        .and(path("/sid"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_spreadsheet(
        &server,
        json!(["item_id", "nombre", "categoria", "confianza", "cantidad"]),
    )
    .await;

    let config = BackendConfig {
        connect_attempts: 3,
        connect_backoff: Duration::from_millis(5),
        ..BackendConfig::default()
    };
    let (_tx, shutdown) = watch::channel(false);
    let backend = SheetsInventory::connect_with_retry(client(&server), &config, shutdown).await;
    assert!(backend.is_ok());
}

#[tokio::test]
async fn test_connect_does_not_retry_a_broken_layout() {
    let server = MockServer::start().await;
    mount_spreadsheet(&server, json!(["item_id", "nombre"])).await;

    let config = BackendConfig {
        connect_attempts: 3,
        connect_backoff: Duration::from_millis(5),
        ..BackendConfig::default()
    };
    let (_tx, shutdown) = watch::channel(false);
    let Err(err) = SheetsInventory::connect_with_retry(client(&server), &config, shutdown).await else {
        panic!("connect should fail without a quantity column");
    };
    assert!(err.is_permanent());
    let metadata_calls = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == "/sid")
        .count();
    assert_eq!(metadata_calls, 1);
}

#[tokio::test]
async fn test_sheet_without_quantity_column_is_permanent() {
    let server = MockServer::start().await;
    mount_spreadsheet(&server, json!(["item_id", "nombre", "categoria"])).await;

    let err = match SheetsInventory::connect(client(&server)).await {
        Ok(_) => panic!("connect should fail without a quantity column"),
        Err(e) => e,
    };
    assert!(err.is_permanent());
}

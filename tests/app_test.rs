#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use perftrack::app::{AppState, EMPTY_MESSAGE, XLSX_CONTENT_TYPE, router};
use perftrack::cache::CachedStore;
use perftrack::config::Config;
use perftrack::store::{MemoryStore, Sheet, StoreError, Table, TableStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower::ServiceExt;

fn app_with(store: impl TableStore + 'static) -> Router {
    router(Arc::new(AppState::new(Box::new(store), &Config::default())))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, req).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn alice_goal() -> Value {
    json!({
        "resource": "Alice",
        "project": "P1",
        "goal": "Ship v1",
        "year": "2025",
        "month": "Mar"
    })
}

#[tokio::test]
async fn index_page_is_served() {
    let app = app_with(MemoryStore::new());
    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("Performance Tracker"));
}

#[tokio::test]
async fn empty_view_says_nothing_to_show() {
    let app = app_with(MemoryStore::new());
    let (status, body) = send_json(&app, get("/api/view")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], json!([]));
    assert_eq!(body["message"], EMPTY_MESSAGE);
}

#[tokio::test]
async fn goal_and_evaluation_flow() {
    let app = app_with(MemoryStore::new());

    let (status, goal) = send_json(&app, json_request("POST", "/api/goals", alice_goal())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = goal["id"].as_str().unwrap().to_string();

    let (status, outcome) = send_json(
        &app,
        json_request(
            "POST",
            "/api/evaluations",
            json!({ "goal_id": id, "status": "Achieved", "rating": 5, "comments": "shipped" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["evaluation"]["status"], "Achieved");

    let (_, view) = send_json(&app, get("/api/view?resource=Alice&month=Mar")).await;
    assert_eq!(view["items"][0]["status"], "Achieved");
    assert!(view.get("message").is_none());

    let (_, summary) = send_json(&app, get("/api/analytics/summary")).await;
    assert_eq!(summary["achievement_rate"], 100.0);

    let (_, board) = send_json(&app, get("/api/analytics/leaderboard?top=1")).await;
    assert_eq!(board["items"][0]["resource"], "Alice");

    let (status, bytes) = send(&app, get("/api/export/view.csv")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(bytes).unwrap().starts_with("Goal ID,Resource Name"));
}

#[tokio::test]
async fn invalid_goal_is_a_bad_request_with_fields() {
    let app = app_with(MemoryStore::new());
    let (status, body) = send_json(
        &app,
        json_request("POST", "/api/goals", json!({ "resource": "Alice", "year": "twenty" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"year"));
    assert!(fields.contains(&"goal"));
}

#[tokio::test]
async fn unknown_goal_is_not_found() {
    let app = app_with(MemoryStore::new());
    let uri = format!("/api/goals/{}", perftrack::model::GoalId::new());
    let (status, _) = send(&app, json_request("PUT", &uri, alice_goal())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn goals_import_from_multipart_upload() {
    let app = app_with(MemoryStore::new());
    let csv = "Resource Name,Project,Goal,Year,Month\nAlice,P1,Ship v1,2025,Mar\nBob,P1,Docs,2025,Apr\n";
    let body = format!(
        "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"goals.csv\"\r\n\
         Content-Type: text/csv\r\n\r\n{csv}\r\n--XBOUNDARY--\r\n"
    );
    let req = Request::builder()
        .method("POST")
        .uri("/api/goals/import")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
        .body(Body::from(body))
        .unwrap();

    let (status, imported) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(imported["items"].as_array().unwrap().len(), 2);

    let (_, resources) = send_json(&app, get("/api/resources?project=P1")).await;
    assert_eq!(resources["items"], json!(["Alice", "Bob"]));
}

fn upload(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/goals/import")
        .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn truncated_upload_is_a_bad_request() {
    let app = app_with(MemoryStore::new());

    // Cut off inside the part headers.
    let (status, body) = send_json(&app, upload("--XBOUNDARY\r\nContent-Disposition: form-da")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"][0]["field"], "upload");

    // Cut off inside the file, before the closing boundary.
    let (status, _) = send(
        &app,
        upload(
            "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"goals.csv\"\r\n\
             Content-Type: text/csv\r\n\r\nResource Name,Project,Goal,Year,Month\nAlice,P1,Ship",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, goals) = send_json(&app, get("/api/goals")).await;
    assert_eq!(goals["items"], json!([]));
}

async fn send_raw(app: &Router, uri: &str) -> (StatusCode, String, Vec<u8>) {
    let response = app.clone().oneshot(get(uri)).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, bytes.to_vec())
}

async fn evaluated_app() -> Router {
    let app = app_with(MemoryStore::new());
    let (_, goal) = send_json(&app, json_request("POST", "/api/goals", alice_goal())).await;
    send(
        &app,
        json_request(
            "POST",
            "/api/evaluations",
            json!({ "goal_id": goal["id"], "status": "Achieved", "rating": 4, "comments": "done" }),
        ),
    )
    .await;
    app
}

#[tokio::test]
async fn charts_are_pngs() {
    let app = evaluated_app().await;
    for uri in [
        "/api/charts/status.png",
        "/api/charts/leaderboard.png",
        "/api/charts/trend.png",
    ] {
        let (status, content_type, bytes) = send_raw(&app, uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(content_type, "image/png");
        assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);
    }

    let (status, content_type, _) = send_raw(&app_with(MemoryStore::new()), "/api/charts/status.png").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "image/png");
}

#[tokio::test]
async fn xlsx_exports_are_workbooks() {
    let app = evaluated_app().await;
    for uri in ["/api/export/view.xlsx", "/api/export/evaluations.xlsx"] {
        let (status, content_type, bytes) = send_raw(&app, uri).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(content_type, XLSX_CONTENT_TYPE);
        // XLSX is a zip archive.
        assert_eq!(&bytes[..2], b"PK");
    }
}

/// A store that is never reachable
struct DownStore;

impl TableStore for DownStore {
    fn read(&self, _: Table) -> Result<Sheet, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn append(&self, _: Table, _: u64, _: Vec<Vec<String>>) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn replace(&self, _: Table, _: u64, _: Vec<Vec<String>>) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn unreachable_store_is_service_unavailable() {
    let app = app_with(DownStore);
    let (status, _) = send(&app, get("/api/view")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

/// A store that can be taken down mid-test
struct SwitchedStore {
    inner: MemoryStore,
    down: Arc<AtomicBool>,
}

impl SwitchedStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        Ok(())
    }
}

impl TableStore for SwitchedStore {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        self.check()?;
        self.inner.read(table)
    }

    fn append(&self, table: Table, expected: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.append(table, expected, rows)
    }

    fn replace(&self, table: Table, expected: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.replace(table, expected, rows)
    }
}

#[tokio::test]
async fn health_sees_through_the_cache() {
    let down = Arc::new(AtomicBool::new(false));
    let app = app_with(CachedStore::new(SwitchedStore {
        inner: MemoryStore::new(),
        down: Arc::clone(&down),
    }));

    let (status, _) = send(&app, get("/api/goals")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);

    down.store(true, Ordering::SeqCst);
    // Cached goals still answer, but the health check goes to the store.
    let (status, _) = send(&app, get("/api/goals")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

/// Every rewrite loses the race against another writer
struct ContendedStore(MemoryStore);

impl TableStore for ContendedStore {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        self.0.read(table)
    }

    fn append(&self, table: Table, expected: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        self.0.append(table, expected, rows)
    }

    fn replace(&self, table: Table, expected: u64, _: Vec<Vec<String>>) -> Result<u64, StoreError> {
        Err(StoreError::Conflict {
            table,
            expected,
            found: expected + 1,
        })
    }
}

#[tokio::test]
async fn concurrent_edit_is_a_conflict() {
    let app = app_with(ContendedStore(MemoryStore::new()));
    let (_, goal) = send_json(&app, json_request("POST", "/api/goals", alice_goal())).await;
    let uri = format!("/api/goals/{}", goal["id"].as_str().unwrap());

    let (status, body) = send_json(&app, json_request("DELETE", &uri, Value::Null)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("reload"));
}

#[tokio::test]
async fn damaged_tab_is_a_server_error() {
    let store = MemoryStore::new();
    store
        .load_sheet(
            Table::PerformanceLog,
            Sheet {
                header: vec!["Goal ID".to_string()],
                rows: Vec::new(),
                version: 0,
            },
        )
        .unwrap();
    let app = app_with(store);
    let (status, _) = send(&app, get("/api/view")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // Goals alone still read fine.
    let (status, _) = send(&app, get("/api/goals")).await;
    assert_eq!(status, StatusCode::OK);
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use dbscope::backend::bigquery::{BigQueryConnector, BigQuerySettings};
use dbscope::backend::{CellValue, Connector};
use dbscope::error::DbError;
use dbscope::template::BoundStatement;
use serde_json::{Value, json};

// --- local jobs.query stand-in ---

type PageFn = dyn Fn(Option<&str>) -> Value + Send + Sync;

#[derive(Clone)]
struct Warehouse {
    submit: Arc<Value>,
    page: Arc<PageFn>,
    bodies: Arc<Mutex<Vec<Value>>>,
    page_tokens: Arc<Mutex<Vec<String>>>,
    polls: Arc<AtomicUsize>,
    cancels: Arc<AtomicUsize>,
}

impl Warehouse {
    fn new(submit: Value, page: impl Fn(Option<&str>) -> Value + Send + Sync + 'static) -> Self {
        Warehouse {
            submit: Arc::new(submit),
            page: Arc::new(page),
            bodies: Arc::default(),
            page_tokens: Arc::default(),
            polls: Arc::default(),
            cancels: Arc::default(),
        }
    }

    async fn start(&self) -> SocketAddr {
        let app = Router::new()
            .route("/projects/:project/queries", post(submit))
            .route("/projects/:project/queries/:job", get(poll))
            .route("/projects/:project/jobs/:job/cancel", post(cancel))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn page_tokens(&self) -> Vec<String> {
        self.page_tokens.lock().unwrap().clone()
    }
}

async fn submit(State(w): State<Warehouse>, Json(body): Json<Value>) -> Json<Value> {
    w.bodies.lock().unwrap().push(body);
    Json((*w.submit).clone())
}

async fn poll(
    State(w): State<Warehouse>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    w.polls.fetch_add(1, Ordering::SeqCst);
    let token = params.get("pageToken").cloned();
    if let Some(ref t) = token {
        w.page_tokens.lock().unwrap().push(t.clone());
    }
    Json((w.page)(token.as_deref()))
}

async fn cancel(State(w): State<Warehouse>) -> Json<Value> {
    w.cancels.fetch_add(1, Ordering::SeqCst);
    Json(json!({}))
}

// --- helpers ---

fn connector_at(
    addr: SocketAddr,
    timeout_secs: u64,
    row_limit: Option<usize>,
) -> BigQueryConnector {
    BigQueryConnector::new(
        BigQuerySettings {
            endpoint: format!("http://{}", addr),
            project: "shop-prod".to_string(),
            dataset: "ecommerce".to_string(),
            location: None,
            token: None,
        },
        timeout_secs,
        row_limit,
    )
    .unwrap()
}

fn statement() -> BoundStatement {
    BoundStatement::unparameterized("SELECT article_id, prod_name FROM articles")
}

fn pending() -> Value {
    json!({
        "jobComplete": false,
        "jobReference": {"jobId": "job_42", "location": "US"}
    })
}

fn schema() -> Value {
    json!({"fields": [
        {"name": "article_id", "type": "STRING"},
        {"name": "prod_name", "type": "STRING"}
    ]})
}

fn rows(ids: &[&str]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| json!({"f": [{"v": id}, {"v": format!("product {}", id)}]}))
            .collect(),
    )
}

fn page(ids: &[&str], next: Option<&str>) -> Value {
    let mut body = json!({
        "jobComplete": true,
        "jobReference": {"jobId": "job_42", "location": "US"},
        "schema": schema(),
        "rows": rows(ids)
    });
    if let Some(token) = next {
        body["pageToken"] = json!(token);
    }
    body
}

fn paged_results(token: Option<&str>) -> Value {
    match token {
        Some("page-2") => page(&["3", "4"], Some("page-3")),
        Some("page-3") => page(&["5", "6"], None),
        _ => page(&["1", "2"], Some("page-2")),
    }
}

fn ids(result: &dbscope::backend::RawResult) -> Vec<String> {
    result
        .rows
        .iter()
        .map(|row| row[0].as_text().unwrap_or_default().to_string())
        .collect()
}

// --- tests ---

#[tokio::test]
async fn test_pending_job_is_polled_until_complete() {
    let warehouse = Warehouse::new(pending(), |_| page(&["0108775015"], None));
    let addr = warehouse.start().await;

    let result = connector_at(addr, 30, Some(500))
        .execute(&statement())
        .await
        .unwrap();

    assert_eq!(warehouse.polls(), 1);
    assert_eq!(result.columns[1].name, "prod_name");
    assert_eq!(result.rows[0][0], CellValue::Text("0108775015".to_string()));
    assert!(!result.truncated);
    assert_eq!(warehouse.cancels(), 0);
}

#[tokio::test]
async fn test_submitted_request_asks_for_integer_timestamps() {
    let warehouse = Warehouse::new(page(&["1"], None), |_| json!({}));
    let addr = warehouse.start().await;

    connector_at(addr, 30, Some(10))
        .execute(&statement())
        .await
        .unwrap();

    let bodies = warehouse.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["formatOptions"]["useInt64Timestamp"], true);
    assert_eq!(bodies[0]["maxResults"], 11);
    assert_eq!(bodies[0]["defaultDataset"]["datasetId"], "ecommerce");
}

#[tokio::test]
async fn test_pages_stop_once_row_limit_is_exceeded() {
    let warehouse = Warehouse::new(paged_results(None), paged_results);
    let addr = warehouse.start().await;

    let result = connector_at(addr, 30, Some(3))
        .execute(&statement())
        .await
        .unwrap();

    assert_eq!(ids(&result), vec!["1", "2", "3"]);
    assert!(result.truncated);
    assert_eq!(warehouse.page_tokens(), vec!["page-2"]);
}

#[tokio::test]
async fn test_pages_followed_to_the_end_without_limit() {
    let warehouse = Warehouse::new(paged_results(None), paged_results);
    let addr = warehouse.start().await;

    let result = connector_at(addr, 30, None)
        .execute(&statement())
        .await
        .unwrap();

    assert_eq!(ids(&result), vec!["1", "2", "3", "4", "5", "6"]);
    assert!(!result.truncated);
    assert_eq!(warehouse.page_tokens(), vec!["page-2", "page-3"]);
}

#[tokio::test]
async fn test_job_past_deadline_is_cancelled() {
    let warehouse = Warehouse::new(pending(), |_| pending());
    let addr = warehouse.start().await;

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        connector_at(addr, 1, Some(10)).execute(&statement()),
    )
    .await
    .expect("execute must give up on its own deadline");

    assert!(
        matches!(outcome, Err(DbError::Timeout { seconds: 1 })),
        "Got: {:?}",
        outcome
    );
    assert!(warehouse.polls() >= 1);
    assert_eq!(warehouse.cancels(), 1);
}

#[tokio::test]
async fn test_silent_endpoint_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accept connections and never write a byte back.
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        connector_at(addr, 1, Some(10)).execute(&statement()),
    )
    .await
    .expect("execute must give up on its own deadline");

    assert!(
        matches!(outcome, Err(DbError::Timeout { seconds: 1 })),
        "Got: {:?}",
        outcome
    );
}

#[tokio::test]
async fn test_refused_connection_is_connection_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = connector_at(addr, 5, Some(10)).execute(&statement()).await;
    assert!(
        matches!(outcome, Err(DbError::Connection { .. })),
        "Got: {:?}",
        outcome
    );
}

use crate::support::{json_payload, FakeConnector};
use dbscope::dispatch::{CatalogScope, Dispatcher};
use dbscope::operation::{BackendKind, Operation, ParamValue, DEFAULT_PREVIEW_LIMIT};
use dbscope::rpc::{handle_line, parse_operation, serve, Request};
use dbscope::template::{CatalogMode, TemplateRegistry};
use serde_json::{json, Value};

fn dispatcher(connector: FakeConnector) -> Dispatcher<FakeConnector> {
    Dispatcher::new(
        connector,
        TemplateRegistry::builtin(CatalogMode::Live).unwrap(),
        CatalogScope::default(),
    )
}

fn request(value: Value) -> Request {
    serde_json::from_value(value).unwrap()
}

async fn respond(d: &Dispatcher<FakeConnector>, line: &str) -> Value {
    serde_json::to_value(handle_line(d, line).await).unwrap()
}

// --- request parsing ---

#[test]
fn test_parse_list_columns() {
    let op = parse_operation(&request(json!({
        "id": 1,
        "operation": "list_columns",
        "arguments": {"schema": "public", "table": "customers"}
    })))
    .unwrap();
    assert_eq!(
        op,
        Operation::ListColumns {
            schema: "public".to_string(),
            table: "customers".to_string()
        }
    );
}

#[test]
fn test_parse_execute_query_params() {
    let op = parse_operation(&request(json!({
        "operation": "execute_query",
        "arguments": {"sql": "SELECT $1, $2, $3", "params": [5, 2.5, "x", null, true]}
    })))
    .unwrap();
    match op {
        Operation::ExecuteQuery { params, .. } => assert_eq!(
            params,
            vec![
                ParamValue::Int(5),
                ParamValue::Float(2.5),
                ParamValue::Text("x".to_string()),
                ParamValue::Null,
                ParamValue::Bool(true),
            ]
        ),
        other => panic!("Expected ExecuteQuery, got {:?}", other),
    }
}

#[test]
fn test_parse_preview_default_limit() {
    let op = parse_operation(&request(json!({
        "operation": "preview_table",
        "arguments": {"schema": "public", "table": "articles"}
    })))
    .unwrap();
    assert_eq!(
        op,
        Operation::PreviewTable {
            schema: "public".to_string(),
            table: "articles".to_string(),
            limit: DEFAULT_PREVIEW_LIMIT,
        }
    );
}

#[test]
fn test_parse_rejects_unknown_operation_and_bad_arguments() {
    assert!(parse_operation(&request(json!({"operation": "drop_everything"}))).is_err());
    assert!(parse_operation(&request(json!({"operation": "list_tables"}))).is_err());
    assert!(parse_operation(&request(json!({
        "operation": "list_tables",
        "arguments": {"schema": 42}
    })))
    .is_err());
    assert!(parse_operation(&request(json!({
        "operation": "execute_query",
        "arguments": {"sql": "SELECT 1", "params": [[1, 2]]}
    })))
    .is_err());
}

// --- responses ---

#[tokio::test]
async fn test_success_response_shape() {
    let d = dispatcher(FakeConnector::returning(
        BackendKind::DirectSql,
        json_payload(r#"[{"name":"public","description":"standard public schema"}]"#),
    ));
    let response = respond(&d, r#"{"id": "req-1", "operation": "list_schemas"}"#).await;
    assert_eq!(
        response,
        json!({
            "id": "req-1",
            "ok": true,
            "result": {
                "kind": "schema_list",
                "entries": [{"name": "public", "description": "standard public schema"}]
            }
        })
    );
}

#[tokio::test]
async fn test_malformed_line_is_validation_error() {
    let d = dispatcher(FakeConnector::empty(BackendKind::DirectSql));
    let response = respond(&d, "{not json").await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["kind"], "ValidationError");
    assert_eq!(d.connector().call_count(), 0);
}

#[tokio::test]
async fn test_missing_operation_keeps_id() {
    let d = dispatcher(FakeConnector::empty(BackendKind::DirectSql));
    let response = respond(&d, r#"{"id": 7, "arguments": {}}"#).await;
    assert_eq!(response["id"], 7);
    assert_eq!(response["error"]["kind"], "ValidationError");
}

#[tokio::test]
async fn test_write_statement_rejected_over_rpc() {
    let d = dispatcher(FakeConnector::empty(BackendKind::DirectSql));
    let response = respond(
        &d,
        r#"{"id": 3, "operation": "execute_query", "arguments": {"sql": "DROP TABLE customers"}}"#,
    )
    .await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["kind"], "ValidationError");
    assert_eq!(d.connector().call_count(), 0);
}

#[tokio::test]
async fn test_query_error_detail_separate_from_message() {
    let d = dispatcher(FakeConnector::new(BackendKind::DirectSql, |_| {
        Err(dbscope::error::DbError::query(
            "backend rejected the statement",
            "[42P01] relation \"nope\" does not exist",
        ))
    }));
    let response = respond(
        &d,
        r#"{"id": 4, "operation": "execute_query", "arguments": {"sql": "SELECT * FROM nope"}}"#,
    )
    .await;
    assert_eq!(response["error"]["kind"], "QueryError");
    assert_eq!(response["error"]["message"], "backend rejected the statement");
    assert_eq!(
        response["error"]["detail"],
        "[42P01] relation \"nope\" does not exist"
    );
}

// --- serve loop ---

#[tokio::test]
async fn test_serve_answers_every_line_and_survives_bad_input() {
    let d = dispatcher(FakeConnector::returning(
        BackendKind::DirectSql,
        json_payload("[]"),
    ));
    let input = concat!(
        r#"{"id": 1, "operation": "list_views"}"#,
        "\n",
        "garbage\n",
        "\n",
        r#"{"id": 2, "operation": "list_tables", "arguments": {"schema": "public"}}"#,
        "\n",
    );
    let mut output: Vec<u8> = Vec::new();
    serve(&d, input.as_bytes(), &mut output).await.unwrap();

    let lines: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["id"], 1);
    assert_eq!(lines[0]["ok"], true);
    assert_eq!(lines[1]["ok"], false);
    assert_eq!(lines[2]["id"], 2);
    assert_eq!(lines[2]["result"]["kind"], "table_list");
}

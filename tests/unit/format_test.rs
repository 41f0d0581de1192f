use dbscope::cli::OutputFormat;
use dbscope::format::{render, to_json, to_toon, truncation_notice};
use dbscope::normalize::{CanonicalResult, ColumnEntry, NamedEntry};
use serde_json::{Map, Value, json};

/// Helper: encode to TOON and decode back to serde_json::Value (no type coercion)
fn round_trip(result: &CanonicalResult) -> Value {
    let toon = to_toon(result).unwrap();
    toon_format::decode_no_coerce(&toon).unwrap()
}

fn row(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn schema_list() -> CanonicalResult {
    CanonicalResult::SchemaList {
        entries: vec![
            NamedEntry {
                name: "public".to_string(),
                description: "standard public schema".to_string(),
            },
            NamedEntry {
                name: "staging".to_string(),
                description: "no description".to_string(),
            },
        ],
    }
}

fn row_set(truncated: bool) -> CanonicalResult {
    CanonicalResult::RowSet {
        columns: vec!["product_name".to_string(), "total_sales".to_string()],
        rows: vec![
            row(&[("product_name", json!("Strap top")), ("total_sales", json!("1520"))]),
            row(&[("product_name", json!("Jade HW skinny")), ("total_sales", Value::Null)]),
        ],
        truncated,
    }
}

#[test]
fn test_json_tags_result_kind() {
    let out = to_json(&schema_list()).unwrap();
    assert!(out.ends_with('\n'));
    let value: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["kind"], "schema_list");
    assert_eq!(value["entries"][0]["name"], "public");
    assert_eq!(value["entries"][1]["description"], "no description");
}

#[test]
fn test_json_column_type_key() {
    let result = CanonicalResult::ColumnList {
        entries: vec![ColumnEntry {
            name: "price".to_string(),
            data_type: "numeric".to_string(),
            description: "unit price".to_string(),
        }],
    };
    let value: Value = serde_json::from_str(&to_json(&result).unwrap()).unwrap();
    assert_eq!(value["entries"][0]["type"], "numeric");
    assert!(value["entries"][0].get("data_type").is_none());
}

#[test]
fn test_json_row_set_keeps_column_order() {
    let out = to_json(&row_set(false)).unwrap();
    let first = out.find("\"product_name\": \"Strap top\"").unwrap();
    let second = out.find("\"total_sales\": \"1520\"").unwrap();
    assert!(first < second);
}

#[test]
fn test_toon_schema_list() {
    let decoded = round_trip(&schema_list());
    let obj = decoded.as_object().expect("output should be a root object");
    assert_eq!(obj["kind"], "schema_list");

    let entries = obj
        .get("entries")
        .expect("should have 'entries' key")
        .as_array()
        .expect("entries should be an array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "public");
    assert_eq!(entries[0]["description"], "standard public schema");
    assert_eq!(entries[1]["name"], "staging");
}

#[test]
fn test_toon_row_set_null_cell() {
    let decoded = round_trip(&row_set(false));
    let rows = decoded["rows"].as_array().expect("rows should be an array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["product_name"], "Strap top");
    assert!(rows[1]["total_sales"].is_null(), "NULL cell should decode as null");
}

#[test]
fn test_toon_empty_entries() {
    let decoded = round_trip(&CanonicalResult::TableList { entries: vec![] });
    assert_eq!(decoded["kind"], "table_list");
    let entries = decoded["entries"].as_array().expect("entries should be an array");
    assert!(entries.is_empty());
}

#[test]
fn test_render_dispatches_on_format() {
    let result = schema_list();
    assert_eq!(
        render(&result, OutputFormat::Json).unwrap(),
        to_json(&result).unwrap()
    );
    assert_eq!(
        render(&result, OutputFormat::Toon).unwrap(),
        to_toon(&result).unwrap()
    );
}

#[test]
fn test_truncation_notice_only_for_truncated_rows() {
    assert_eq!(
        truncation_notice(&row_set(true)).as_deref(),
        Some("showing 2 rows; use --row-limit or --no-limit to return more")
    );
    assert!(truncation_notice(&row_set(false)).is_none());
    assert!(truncation_notice(&schema_list()).is_none());
}

//! Canonical result shapes and the normalizer that produces them.
//!
//! Catalog templates answer in one of two forms: a single JSON-text cell (an array of entries,
//! or one object for database info), or plain tabular rows whose column names are the entry
//! fields. Both collapse into the same [`CanonicalResult`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::{CellValue, RawResult};
use crate::error::DbError;
use crate::operation::OperationKind;

/// Stands in for a catalog description that is absent, NULL or blank.
pub const NO_DESCRIPTION: &str = "no description";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntry {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEntry {
    pub schema: String,
    pub name: String,
    pub definition: String,
}

/// The backend-independent response returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalResult {
    SchemaList {
        entries: Vec<NamedEntry>,
    },
    TableList {
        entries: Vec<NamedEntry>,
    },
    ColumnList {
        entries: Vec<ColumnEntry>,
    },
    DatabaseInfo {
        name: String,
        description: String,
    },
    RowSet {
        columns: Vec<String>,
        rows: Vec<Map<String, Value>>,
        truncated: bool,
    },
    ViewList {
        entries: Vec<ViewEntry>,
    },
}

pub fn normalize(kind: OperationKind, raw: RawResult) -> Result<CanonicalResult, DbError> {
    match kind {
        OperationKind::ListSchemas => Ok(CanonicalResult::SchemaList {
            entries: named_entries(&raw)?,
        }),
        OperationKind::ListTables => Ok(CanonicalResult::TableList {
            entries: named_entries(&raw)?,
        }),
        OperationKind::ListColumns => {
            let entries = catalog_records(&raw)?
                .iter()
                .map(|r| {
                    Ok(ColumnEntry {
                        name: required(r, &["name", "column_name"])?,
                        data_type: required(r, &["type", "data_type"])?,
                        description: description(r),
                    })
                })
                .collect::<Result<Vec<_>, DbError>>()?;
            Ok(CanonicalResult::ColumnList { entries })
        }
        OperationKind::ListDatabaseInfo => {
            let records = catalog_records(&raw)?;
            let record = records
                .first()
                .ok_or_else(|| malformed("database info returned no rows"))?;
            Ok(CanonicalResult::DatabaseInfo {
                name: required(record, &["name"])?,
                description: description(record),
            })
        }
        OperationKind::ListViews => {
            let entries = catalog_records(&raw)?
                .iter()
                .map(|r| {
                    Ok(ViewEntry {
                        schema: required(r, &["schema", "table_schema"])?,
                        name: required(r, &["name", "table_name"])?,
                        definition: optional(r, &["definition", "view_definition"])
                            .unwrap_or_default(),
                    })
                })
                .collect::<Result<Vec<_>, DbError>>()?;
            Ok(CanonicalResult::ViewList { entries })
        }
        OperationKind::ExecuteQuery | OperationKind::PreviewTable => Ok(row_set(raw)),
    }
}

fn named_entries(raw: &RawResult) -> Result<Vec<NamedEntry>, DbError> {
    catalog_records(raw)?
        .iter()
        .map(|r| {
            Ok(NamedEntry {
                name: required(r, &["name", "schema_name", "table_name"])?,
                description: description(r),
            })
        })
        .collect()
}

/// Flatten either source shape into JSON records.
fn catalog_records(raw: &RawResult) -> Result<Vec<Map<String, Value>>, DbError> {
    if let Some(payload) = json_text_payload(raw) {
        return match payload {
            None => Ok(Vec::new()),
            Some(text) => parse_payload(text),
        };
    }

    Ok(raw
        .rows
        .iter()
        .map(|row| {
            raw.columns
                .iter()
                .zip(row.iter())
                .map(|(col, cell)| (col.name.to_ascii_lowercase(), cell_to_json(cell)))
                .collect::<Map<_, _>>()
        })
        .collect())
}

/// A result is in JSON-text form when it has one column and at most one row whose cell is
/// empty or holds a JSON array/object. Returns `Some(None)` for an empty payload.
fn json_text_payload(raw: &RawResult) -> Option<Option<&str>> {
    if raw.columns.len() != 1 || raw.rows.len() > 1 {
        return None;
    }
    match raw.rows.first().and_then(|row| row.first()) {
        None | Some(CellValue::Null) => Some(None),
        Some(CellValue::Text(text)) => {
            let trimmed = text.trim_start();
            if trimmed.starts_with('[') || trimmed.starts_with('{') {
                Some(Some(text))
            } else {
                None
            }
        }
    }
}

fn parse_payload(text: &str) -> Result<Vec<Map<String, Value>>, DbError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| malformed(&format!("catalog payload is not valid JSON: {}", e)))?;
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(vec![map]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => Err(malformed(&format!("catalog entry is not an object: {}", other))),
            })
            .collect(),
        other => Err(malformed(&format!("unexpected catalog payload: {}", other))),
    }
}

fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Text(s) => Value::String(s.clone()),
        CellValue::Null => Value::Null,
    }
}

fn optional(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| record.get(*k))
        .and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
}

fn required(record: &Map<String, Value>, keys: &[&str]) -> Result<String, DbError> {
    optional(record, keys)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed(&format!("catalog entry is missing '{}'", keys[0])))
}

fn description(record: &Map<String, Value>) -> String {
    optional(record, &["description"])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| NO_DESCRIPTION.to_string())
}

fn row_set(raw: RawResult) -> CanonicalResult {
    let columns = unique_column_names(&raw);
    let rows = raw
        .rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = row.get(i).map(cell_to_json).unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect::<Map<_, _>>()
        })
        .collect();

    CanonicalResult::RowSet {
        columns,
        rows,
        truncated: raw.truncated,
    }
}

/// Records are keyed by column name, so repeated names (`SELECT a.id, b.id`) get a suffix.
fn unique_column_names(raw: &RawResult) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(raw.columns.len());
    for col in &raw.columns {
        let mut candidate = col.name.clone();
        let mut n = 2;
        while names.contains(&candidate) {
            candidate = format!("{}_{}", col.name, n);
            n += 1;
        }
        names.push(candidate);
    }
    names
}

fn malformed(detail: &str) -> DbError {
    DbError::query("unexpected catalog response", detail)
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which storage engine dialect a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Postgres reached over its wire protocol.
    DirectSql,
    /// BigQuery-style warehouse reached over REST.
    Warehouse,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::DirectSql, BackendKind::Warehouse];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::DirectSql => "direct_sql",
            BackendKind::Warehouse => "warehouse",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar bound to a statement through the backend's native parameter mechanism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Parse a CLI `--param` value: integers, floats, `true`/`false` and `null`
    /// are typed, everything else is text.
    pub fn parse_cli(raw: &str) -> Self {
        match raw {
            "null" => ParamValue::Null,
            "true" => ParamValue::Bool(true),
            "false" => ParamValue::Bool(false),
            _ => {
                if let Ok(i) = raw.parse::<i64>() {
                    ParamValue::Int(i)
                } else if let Ok(f) = raw.parse::<f64>()
                    && f.is_finite()
                {
                    ParamValue::Float(f)
                } else {
                    ParamValue::Text(raw.to_string())
                }
            }
        }
    }
}

/// Argument-free discriminant of [`Operation`], used as the template registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ListSchemas,
    ListTables,
    ListColumns,
    ListDatabaseInfo,
    ExecuteQuery,
    ListViews,
    PreviewTable,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::ListSchemas,
        OperationKind::ListTables,
        OperationKind::ListColumns,
        OperationKind::ListDatabaseInfo,
        OperationKind::ExecuteQuery,
        OperationKind::ListViews,
        OperationKind::PreviewTable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ListSchemas => "list_schemas",
            OperationKind::ListTables => "list_tables",
            OperationKind::ListColumns => "list_columns",
            OperationKind::ListDatabaseInfo => "list_database_info",
            OperationKind::ExecuteQuery => "execute_query",
            OperationKind::ListViews => "list_views",
            OperationKind::PreviewTable => "preview_table",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_PREVIEW_LIMIT: u32 = 10;
pub const MAX_PREVIEW_LIMIT: u32 = 1000;

/// A request against the introspection layer, with its typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    ListSchemas,
    ListTables {
        schema: String,
    },
    ListColumns {
        schema: String,
        table: String,
    },
    ListDatabaseInfo,
    ExecuteQuery {
        sql: String,
        params: Vec<ParamValue>,
    },
    ListViews,
    PreviewTable {
        schema: String,
        table: String,
        limit: u32,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::ListSchemas => OperationKind::ListSchemas,
            Operation::ListTables { .. } => OperationKind::ListTables,
            Operation::ListColumns { .. } => OperationKind::ListColumns,
            Operation::ListDatabaseInfo => OperationKind::ListDatabaseInfo,
            Operation::ExecuteQuery { .. } => OperationKind::ExecuteQuery,
            Operation::ListViews => OperationKind::ListViews,
            Operation::PreviewTable { .. } => OperationKind::PreviewTable,
        }
    }
}

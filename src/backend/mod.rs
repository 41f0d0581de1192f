pub mod bigquery;
pub mod postgres;

use crate::error::DbError;
use crate::operation::BackendKind;
use crate::template::BoundStatement;

/// Metadata for a single result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A single cell value from a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Null,
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            CellValue::Null => None,
        }
    }
}

/// Text form shared by both backends for array cells: a JSON array of element text or null.
pub(crate) fn array_text(items: impl IntoIterator<Item = Option<String>>) -> String {
    serde_json::Value::Array(
        items
            .into_iter()
            .map(|item| item.map_or(serde_json::Value::Null, serde_json::Value::String))
            .collect(),
    )
    .to_string()
}

/// Rows exactly as the backend returned them, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<CellValue>>,
    pub truncated: bool,
}

impl RawResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A handle to exactly one configured storage backend.
///
/// Implementations own their connection lifecycle: opened on first use, reused across calls,
/// released by [`Connector::close`].
pub trait Connector: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn execute(
        &self,
        statement: &BoundStatement,
    ) -> impl std::future::Future<Output = Result<RawResult, DbError>> + Send;

    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}

/// The connector selected by configuration at startup.
pub enum AnyConnector {
    Postgres(postgres::PostgresConnector),
    BigQuery(bigquery::BigQueryConnector),
}

impl Connector for AnyConnector {
    fn kind(&self) -> BackendKind {
        match self {
            AnyConnector::Postgres(c) => c.kind(),
            AnyConnector::BigQuery(c) => c.kind(),
        }
    }

    async fn execute(&self, statement: &BoundStatement) -> Result<RawResult, DbError> {
        match self {
            AnyConnector::Postgres(c) => c.execute(statement).await,
            AnyConnector::BigQuery(c) => c.execute(statement).await,
        }
    }

    async fn close(&self) {
        match self {
            AnyConnector::Postgres(c) => c.close().await,
            AnyConnector::BigQuery(c) => c.close().await,
        }
    }
}

use std::time::Duration;

use futures::TryStreamExt;
use secrecy::{ExposeSecret, SecretString};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::types::{Decimal, JsonValue, Uuid};
use sqlx::{Column, Executor, PgPool, Postgres, Row, TypeInfo, ValueRef};
use tracing::{debug, instrument};

use crate::backend::{CellValue, ColumnMeta, Connector, RawResult, array_text};
use crate::error::DbError;
use crate::operation::{BackendKind, ParamValue};
use crate::template::BoundStatement;

pub const DEFAULT_POOL_SIZE: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection parameters for a Postgres server.
#[derive(Debug)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<SecretString>,
    pub pool_size: u32,
}

pub struct PostgresConnector {
    pool: PgPool,
    timeout_secs: u64,
    row_limit: Option<usize>,
}

impl PostgresConnector {
    /// Build a lazily-connecting pool; no connection is opened until the first statement.
    pub fn new(settings: &PostgresSettings, timeout_secs: u64, row_limit: Option<usize>) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.user)
            .application_name("dbscope");
        if let Some(ref password) = settings.password {
            options = options.password(password.expose_secret());
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.pool_size.max(1))
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        Self {
            pool,
            timeout_secs,
            row_limit,
        }
    }

    async fn run(&self, statement: &BoundStatement) -> Result<RawResult, DbError> {
        if statement.pass_through {
            // Caller SQL only ever runs inside a read-only transaction.
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            let result = self.fetch(&mut *tx, statement).await;
            tx.rollback().await.map_err(map_sqlx_error)?;
            result
        } else {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
            self.fetch(&mut *conn, statement).await
        }
    }

    async fn fetch(
        &self,
        conn: &mut sqlx::PgConnection,
        statement: &BoundStatement,
    ) -> Result<RawResult, DbError> {
        let query = statement
            .params
            .iter()
            .fold(sqlx::query(&statement.sql), |q, p| bind_param(q, &p.value));

        let mut rows: Vec<Vec<CellValue>> = Vec::new();
        let mut columns: Vec<ColumnMeta> = Vec::new();
        let mut truncated = false;

        {
            let mut stream = query.fetch(&mut *conn);
            while let Some(row) = stream.try_next().await.map_err(map_sqlx_error)? {
                if columns.is_empty() {
                    columns = row_columns(&row);
                }
                if let Some(lim) = self.row_limit
                    && rows.len() >= lim
                {
                    truncated = true;
                    break;
                }
                rows.push(decode_row(&row)?);
            }
        }

        // An empty result still carries its column names.
        if columns.is_empty() {
            let described = conn
                .describe(&statement.sql)
                .await
                .map_err(map_sqlx_error)?;
            columns = described
                .columns()
                .iter()
                .map(|c| ColumnMeta::new(c.name(), c.type_info().name()))
                .collect();
        }

        Ok(RawResult {
            columns,
            rows,
            truncated,
        })
    }
}

impl Connector for PostgresConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::DirectSql
    }

    #[instrument(skip_all, fields(backend = "direct_sql", params = statement.params.len()))]
    async fn execute(&self, statement: &BoundStatement) -> Result<RawResult, DbError> {
        let limit = Duration::from_secs(self.timeout_secs);
        match tokio::time::timeout(limit, self.run(statement)).await {
            Ok(result) => {
                if let Ok(ref raw) = result {
                    debug!(rows = raw.rows.len(), truncated = raw.truncated, "statement complete");
                }
                result
            }
            Err(_) => Err(DbError::Timeout {
                seconds: self.timeout_secs,
            }),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &ParamValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ParamValue::Null => query.bind(None::<String>),
        ParamValue::Bool(b) => query.bind(*b),
        ParamValue::Int(i) => query.bind(*i),
        ParamValue::Float(f) => query.bind(*f),
        ParamValue::Text(s) => query.bind(s.clone()),
    }
}

fn row_columns(row: &PgRow) -> Vec<ColumnMeta> {
    row.columns()
        .iter()
        .map(|c| ColumnMeta::new(c.name(), c.type_info().name()))
        .collect()
}

fn decode_row(row: &PgRow) -> Result<Vec<CellValue>, DbError> {
    (0..row.len()).map(|idx| decode_cell(row, idx)).collect()
}

/// Render one cell as text, the same representation the warehouse returns on the wire.
fn decode_cell(row: &PgRow, idx: usize) -> Result<CellValue, DbError> {
    let raw = row.try_get_raw(idx).map_err(map_sqlx_error)?;
    if raw.is_null() {
        return Ok(CellValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let text = match type_name.strip_suffix("[]") {
        Some(element) => decode_array(row, idx, element),
        None => decode_scalar(row, idx, &type_name),
    };
    text.map(CellValue::Text)
}

fn decode_scalar(row: &PgRow, idx: usize, type_name: &str) -> Result<String, DbError> {
    let text = match type_name {
        "BOOL" => get::<bool>(row, idx)?.to_string(),
        "INT2" => get::<i16>(row, idx)?.to_string(),
        "INT4" => get::<i32>(row, idx)?.to_string(),
        "INT8" => get::<i64>(row, idx)?.to_string(),
        "OID" => get::<Oid>(row, idx)?.0.to_string(),
        "FLOAT4" => get::<f32>(row, idx)?.to_string(),
        "FLOAT8" => get::<f64>(row, idx)?.to_string(),
        "NUMERIC" => get::<Decimal>(row, idx)?.to_string(),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "\"CHAR\"" | "CITEXT" => {
            get::<String>(row, idx)?
        }
        "JSON" | "JSONB" => get::<JsonValue>(row, idx)?.to_string(),
        "DATE" => get::<NaiveDate>(row, idx)?.to_string(),
        "TIME" => get::<NaiveTime>(row, idx)?.to_string(),
        "TIMESTAMP" => get::<NaiveDateTime>(row, idx)?.to_string(),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, idx)?.to_rfc3339(),
        "UUID" => get::<Uuid>(row, idx)?.to_string(),
        "BYTEA" => bytea_text(&get::<Vec<u8>>(row, idx)?),
        other => return Err(unsupported_type(row, idx, other)),
    };
    Ok(text)
}

/// Arrays render as a JSON array of element text, matching REPEATED warehouse fields.
fn decode_array(row: &PgRow, idx: usize, element: &str) -> Result<String, DbError> {
    let text = match element {
        "BOOL" => elements(get::<Vec<Option<bool>>>(row, idx)?, |v| v.to_string()),
        "INT2" => elements(get::<Vec<Option<i16>>>(row, idx)?, |v| v.to_string()),
        "INT4" => elements(get::<Vec<Option<i32>>>(row, idx)?, |v| v.to_string()),
        "INT8" => elements(get::<Vec<Option<i64>>>(row, idx)?, |v| v.to_string()),
        "FLOAT4" => elements(get::<Vec<Option<f32>>>(row, idx)?, |v| v.to_string()),
        "FLOAT8" => elements(get::<Vec<Option<f64>>>(row, idx)?, |v| v.to_string()),
        "NUMERIC" => elements(get::<Vec<Option<Decimal>>>(row, idx)?, |v| v.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            elements(get::<Vec<Option<String>>>(row, idx)?, |v| v)
        }
        "JSON" | "JSONB" => elements(get::<Vec<Option<JsonValue>>>(row, idx)?, |v| v.to_string()),
        "DATE" => elements(get::<Vec<Option<NaiveDate>>>(row, idx)?, |v| v.to_string()),
        "TIMESTAMP" => elements(get::<Vec<Option<NaiveDateTime>>>(row, idx)?, |v| {
            v.to_string()
        }),
        "TIMESTAMPTZ" => elements(get::<Vec<Option<DateTime<Utc>>>>(row, idx)?, |v| {
            v.to_rfc3339()
        }),
        "UUID" => elements(get::<Vec<Option<Uuid>>>(row, idx)?, |v| v.to_string()),
        other => return Err(unsupported_type(row, idx, &format!("{other}[]"))),
    };
    Ok(text)
}

fn elements<T>(items: Vec<Option<T>>, render: impl Fn(T) -> String) -> String {
    array_text(items.into_iter().map(|item| item.map(&render)))
}

/// Postgres hex output format: `\x` followed by two lowercase digits per byte.
fn bytea_text(bytes: &[u8]) -> String {
    format!("\\x{}", hex::encode(bytes))
}

fn unsupported_type(row: &PgRow, idx: usize, type_name: &str) -> DbError {
    let column = row.columns().get(idx).map_or("?", |c| c.name());
    unsupported_column(column, type_name)
}

fn unsupported_column(column: &str, type_name: &str) -> DbError {
    DbError::query(
        format!("column type {} cannot be returned", type_name.to_lowercase()),
        format!(
            "column '{}' has type {}; cast it to text in the query",
            column, type_name
        ),
    )
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<T, DbError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<T, _>(idx).map_err(map_sqlx_error)
}

/// Classify a driver error into the caller-facing taxonomy. Transport failures are
/// connection errors; everything the server reports is a query error with its text kept as
/// diagnostic detail.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> DbError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Configuration(_) => DbError::Connection {
            message: format!("postgres unreachable: {}", err),
        },
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.to_string()).unwrap_or_default();
            // 28xxx: invalid authorization, 3D000: unknown database
            if code.starts_with("28") || code == "3D000" {
                return DbError::Connection {
                    message: format!("postgres refused the session: {}", db.message()),
                };
            }
            let detail = if code.is_empty() {
                db.message().to_string()
            } else {
                format!("[{}] {}", code, db.message())
            };
            DbError::query("backend rejected the statement", detail)
        }
        other => DbError::query("statement execution failed", other.to_string()),
    }
}

//! Line-delimited JSON request/response protocol.
//!
//! Each input line is one request, each output line one response. A bad line produces an
//! error response and the loop moves on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::backend::Connector;
use crate::dispatch::Dispatcher;
use crate::error::{DbError, ErrorKind};
use crate::normalize::CanonicalResult;
use crate::operation::{DEFAULT_PREVIEW_LIMIT, Operation, OperationKind, ParamValue};

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub operation: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&DbError> for ErrorBody {
    fn from(err: &DbError) -> Self {
        let message = match err {
            DbError::Query { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind(),
            message,
            detail: err.detail().map(str::to_string),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CanonicalResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: Value, result: CanonicalResult) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, err: &DbError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody::from(err)),
        }
    }
}

fn operation_kind(name: &str) -> Result<OperationKind, DbError> {
    OperationKind::ALL
        .into_iter()
        .find(|k| k.as_str() == name)
        .ok_or_else(|| DbError::validation(format!("unknown operation '{}'", name)))
}

fn string_arg(args: &Map<String, Value>, key: &str) -> Result<String, DbError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(DbError::validation(format!("argument '{}' must be a string", key))),
        None => Err(DbError::validation(format!("missing argument '{}'", key))),
    }
}

fn param_arg(value: &Value) -> Result<ParamValue, DbError> {
    match value {
        Value::Null => Ok(ParamValue::Null),
        Value::Bool(b) => Ok(ParamValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(ParamValue::Int)
            .or_else(|| n.as_f64().map(ParamValue::Float))
            .ok_or_else(|| DbError::validation(format!("parameter {} is out of range", n))),
        Value::String(s) => Ok(ParamValue::Text(s.clone())),
        other => Err(DbError::validation(format!(
            "parameters must be scalars, got {}",
            other
        ))),
    }
}

/// Turn a decoded request into a typed operation.
pub fn parse_operation(request: &Request) -> Result<Operation, DbError> {
    let args = &request.arguments;
    let op = match operation_kind(&request.operation)? {
        OperationKind::ListSchemas => Operation::ListSchemas,
        OperationKind::ListDatabaseInfo => Operation::ListDatabaseInfo,
        OperationKind::ListViews => Operation::ListViews,
        OperationKind::ListTables => Operation::ListTables {
            schema: string_arg(args, "schema")?,
        },
        OperationKind::ListColumns => Operation::ListColumns {
            schema: string_arg(args, "schema")?,
            table: string_arg(args, "table")?,
        },
        OperationKind::PreviewTable => {
            let limit = match args.get("limit") {
                None | Some(Value::Null) => DEFAULT_PREVIEW_LIMIT,
                Some(v) => v
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| DbError::validation("limit must be a positive integer"))?,
            };
            Operation::PreviewTable {
                schema: string_arg(args, "schema")?,
                table: string_arg(args, "table")?,
                limit,
            }
        }
        OperationKind::ExecuteQuery => {
            let params = match args.get("params") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => {
                    items.iter().map(param_arg).collect::<Result<Vec<_>, _>>()?
                }
                Some(_) => return Err(DbError::validation("argument 'params' must be an array")),
            };
            Operation::ExecuteQuery {
                sql: string_arg(args, "sql")?,
                params,
            }
        }
    };
    Ok(op)
}

/// Handle one request line. Never fails: every problem becomes an error response.
pub async fn handle_line<C: Connector>(dispatcher: &Dispatcher<C>, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            let id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| v.get("id").cloned())
                .unwrap_or(Value::Null);
            return Response::failure(id, &DbError::validation(format!("malformed request: {}", e)));
        }
    };

    let operation = match parse_operation(&request) {
        Ok(op) => op,
        Err(e) => return Response::failure(request.id, &e),
    };

    match dispatcher.dispatch(&operation).await {
        Ok(result) => Response::success(request.id, result),
        Err(e) => Response::failure(request.id, &e),
    }
}

/// Serve requests until the input closes.
pub async fn serve<C, R, W>(
    dispatcher: &Dispatcher<C>,
    input: R,
    mut output: W,
) -> Result<(), DbError>
where
    C: Connector,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut handled = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(dispatcher, &line).await;
        if !response.ok {
            warn!(id = %response.id, "request failed");
        }
        let mut encoded = serde_json::to_string(&response).map_err(|e| DbError::Io(e.into()))?;
        encoded.push('\n');
        output.write_all(encoded.as_bytes()).await?;
        output.flush().await?;
        handled += 1;
    }
    debug!(handled, "input closed");
    Ok(())
}

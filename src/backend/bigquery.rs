use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::backend::{CellValue, ColumnMeta, Connector, RawResult, array_text};
use crate::error::DbError;
use crate::operation::{BackendKind, ParamValue};
use crate::template::{BoundParam, BoundStatement};

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on how long a single request may hold the job open server-side.
const MAX_WAIT_MS: u64 = 10_000;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection parameters for a BigQuery project.
#[derive(Debug)]
pub struct BigQuerySettings {
    pub endpoint: String,
    pub project: String,
    pub dataset: String,
    pub location: Option<String>,
    pub token: Option<SecretString>,
}

pub struct BigQueryConnector {
    settings: BigQuerySettings,
    timeout_secs: u64,
    row_limit: Option<usize>,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    query_parameters: Vec<QueryParameter>,
    default_dataset: DatasetReference,
    format_options: FormatOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    project_id: String,
    dataset_id: String,
}

/// TIMESTAMP cells as integer microseconds instead of float seconds.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FormatOptions {
    use_int64_timestamp: bool,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
struct QueryParameter {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

#[derive(Serialize, Debug, PartialEq)]
struct ParameterType {
    #[serde(rename = "type")]
    type_name: &'static str,
}

#[derive(Serialize, Debug, PartialEq)]
struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_complete: Option<bool>,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    rows: Option<Vec<TableRow>>,
    page_token: Option<String>,
    errors: Option<Vec<ErrorProto>>,
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Deserialize)]
struct TableSchema {
    fields: Option<Vec<TableField>>,
}

#[derive(Deserialize)]
struct TableField {
    name: String,
    #[serde(rename = "type")]
    field_type: Option<String>,
}

#[derive(Deserialize)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Deserialize, Debug)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

impl BigQueryConnector {
    pub fn new(
        settings: BigQuerySettings,
        timeout_secs: u64,
        row_limit: Option<usize>,
    ) -> Result<Self, DbError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| DbError::Config {
                message: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self {
            settings,
            timeout_secs,
            row_limit,
            client,
        })
    }

    fn project_url(&self) -> String {
        format!(
            "{}/projects/{}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.project
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.settings.token {
            Some(ref token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn remaining(&self, started: Instant) -> Duration {
        self.deadline().saturating_sub(started.elapsed())
    }

    fn request_for(&self, statement: &BoundStatement) -> QueryRequest {
        let query_parameters = statement
            .params
            .iter()
            .map(to_query_parameter)
            .collect::<Vec<_>>();
        let parameter_mode = if query_parameters.is_empty() {
            None
        } else if statement.params.iter().all(|p| p.name.is_some()) {
            Some("NAMED")
        } else {
            Some("POSITIONAL")
        };

        QueryRequest {
            query: statement.sql.clone(),
            use_legacy_sql: false,
            timeout_ms: (self.timeout_secs * 1000).min(MAX_WAIT_MS),
            max_results: self.row_limit.map(|l| l + 1),
            parameter_mode,
            query_parameters,
            default_dataset: DatasetReference {
                project_id: self.settings.project.clone(),
                dataset_id: self.settings.dataset.clone(),
            },
            format_options: FormatOptions {
                use_int64_timestamp: true,
            },
            location: self.settings.location.clone(),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<QueryResponse, DbError> {
        let resp = self
            .authorized(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body, self.timeout_secs));
        }

        let response: QueryResponse = resp.json().await.map_err(|e| {
            DbError::query(
                "unreadable warehouse response",
                format!("failed to parse response: {}", e),
            )
        })?;

        if let Some(errors) = response.errors.as_ref().filter(|e| !e.is_empty())
            && response.job_complete.unwrap_or(false)
        {
            return Err(DbError::query(
                "backend rejected the statement",
                describe_errors(errors),
            ));
        }
        Ok(response)
    }

    async fn poll_job(
        &self,
        job: &JobReference,
        started: Instant,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, DbError> {
        let url = format!("{}/queries/{}", self.project_url(), job.job_id);
        let mut first = true;

        loop {
            if !first {
                tokio::time::sleep(POLL_INTERVAL.min(self.remaining(started))).await;
            }
            first = false;

            // Never ask the server to hold the request past the caller's deadline.
            let wait_ms = (self.remaining(started).as_millis() as u64).min(MAX_WAIT_MS);
            let mut query: Vec<(&str, String)> = vec![
                ("timeoutMs", wait_ms.to_string()),
                ("formatOptions.useInt64Timestamp", "true".to_string()),
            ];
            if let Some(ref location) = job.location {
                query.push(("location", location.clone()));
            }
            if let Some(limit) = self.row_limit {
                query.push(("maxResults", (limit + 1).to_string()));
            }
            if let Some(token) = page_token {
                query.push(("pageToken", token.to_string()));
            }

            let response = self.send(self.client.get(&url).query(&query)).await?;
            if response.job_complete.unwrap_or(false) {
                return Ok(response);
            }
            debug!(job_id = %job.job_id, "job still running");
        }
    }

    async fn cancel(&self, job: &JobReference) {
        let url = format!("{}/jobs/{}/cancel", self.project_url(), job.job_id);
        let mut request = self.client.post(&url).timeout(CANCEL_TIMEOUT);
        if let Some(ref location) = job.location {
            request = request.query(&[("location", location)]);
        }
        match self.authorized(request).send().await {
            Ok(_) => debug!(job_id = %job.job_id, "cancelled timed-out job"),
            Err(e) => warn!(job_id = %job.job_id, error = %e, "failed to cancel timed-out job"),
        }
    }

    async fn run(
        &self,
        statement: &BoundStatement,
        started: Instant,
        submitted: &Mutex<Option<JobReference>>,
    ) -> Result<RawResult, DbError> {
        let url = format!("{}/queries", self.project_url());
        let request = self.request_for(statement);

        let mut response = self.send(self.client.post(&url).json(&request)).await?;
        let job = response.job_reference.clone();
        if let Some(ref job) = job {
            remember(submitted, job);
        }

        if !response.job_complete.unwrap_or(false) {
            let job = job.as_ref().ok_or_else(|| {
                DbError::query(
                    "unreadable warehouse response",
                    "no jobReference in pending response",
                )
            })?;
            response = self.poll_job(job, started, None).await?;
        }

        let columns = take_columns(&mut response);
        let mut rows = take_rows(&mut response, &columns)?;

        // Follow pages until the row limit is satisfied or the result is exhausted.
        while let (Some(token), Some(job)) = (response.page_token.take(), job.as_ref()) {
            if let Some(limit) = self.row_limit
                && rows.len() > limit
            {
                break;
            }
            response = self.poll_job(job, started, Some(&token)).await?;
            rows.extend(take_rows(&mut response, &columns)?);
        }

        let mut truncated = false;
        if let Some(limit) = self.row_limit
            && rows.len() > limit
        {
            rows.truncate(limit);
            truncated = true;
        }

        Ok(RawResult {
            columns,
            rows,
            truncated,
        })
    }
}

impl Connector for BigQueryConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Warehouse
    }

    #[instrument(skip_all, fields(backend = "warehouse", params = statement.params.len()))]
    async fn execute(&self, statement: &BoundStatement) -> Result<RawResult, DbError> {
        let started = Instant::now();
        let submitted = Mutex::new(None);

        let outcome = match tokio::time::timeout(
            self.deadline(),
            self.run(statement, started, &submitted),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DbError::Timeout {
                seconds: self.timeout_secs,
            }),
        };

        match outcome {
            Ok(result) => {
                debug!(
                    rows = result.rows.len(),
                    truncated = result.truncated,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "statement complete"
                );
                Ok(result)
            }
            Err(err @ DbError::Timeout { .. }) => {
                let job = submitted.lock().ok().and_then(|mut slot| slot.take());
                if let Some(job) = job {
                    self.cancel(&job).await;
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn close(&self) {}
}

fn remember(slot: &Mutex<Option<JobReference>>, job: &JobReference) {
    if let Ok(mut slot) = slot.lock() {
        *slot = Some(job.clone());
    }
}

fn to_query_parameter(param: &BoundParam) -> QueryParameter {
    let (type_name, value) = match &param.value {
        ParamValue::Null => ("STRING", None),
        ParamValue::Bool(b) => ("BOOL", Some(b.to_string())),
        ParamValue::Int(i) => ("INT64", Some(i.to_string())),
        ParamValue::Float(f) => ("FLOAT64", Some(f.to_string())),
        ParamValue::Text(s) => ("STRING", Some(s.clone())),
    };
    QueryParameter {
        name: param.name.clone(),
        parameter_type: ParameterType { type_name },
        parameter_value: ParameterValue { value },
    }
}

fn take_columns(response: &mut QueryResponse) -> Vec<ColumnMeta> {
    response
        .schema
        .take()
        .and_then(|s| s.fields)
        .unwrap_or_default()
        .into_iter()
        .map(|f| ColumnMeta {
            name: f.name,
            type_name: f.field_type.unwrap_or_else(|| "STRING".to_string()),
        })
        .collect()
}

fn take_rows(
    response: &mut QueryResponse,
    columns: &[ColumnMeta],
) -> Result<Vec<Vec<CellValue>>, DbError> {
    response
        .rows
        .take()
        .unwrap_or_default()
        .into_iter()
        .map(|row| {
            row.f
                .into_iter()
                .enumerate()
                .map(|(idx, cell)| -> Result<CellValue, DbError> {
                    let field_type = columns.get(idx).map_or("STRING", |c| c.type_name.as_str());
                    Ok(match render_value(field_type, cell.v)? {
                        Some(text) => CellValue::Text(text),
                        None => CellValue::Null,
                    })
                })
                .collect()
        })
        .collect()
}

/// Render one wire value as canonical cell text. REPEATED fields arrive as an array of
/// `{"v": ...}` wrappers, RECORD fields as an `{"f": [...]}` object.
fn render_value(field_type: &str, value: Value) -> Result<Option<String>, DbError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => render_scalar(field_type, s).map(Some),
        Value::Array(items) => {
            let elements = items
                .into_iter()
                .map(|item| {
                    let inner = match item {
                        Value::Object(mut wrapper) => wrapper.remove("v").unwrap_or(Value::Null),
                        other => other,
                    };
                    render_value(field_type, inner)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(array_text(elements)))
        }
        other => Ok(Some(other.to_string())),
    }
}

fn render_scalar(field_type: &str, text: String) -> Result<String, DbError> {
    match field_type {
        "TIMESTAMP" => timestamp_text(&text),
        // "2024-01-08T16:00:00" reads the same as a Postgres TIMESTAMP
        "DATETIME" => Ok(NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|dt| dt.to_string())
            .unwrap_or(text)),
        _ => Ok(text),
    }
}

/// TIMESTAMP cells come back as integer microseconds (or float seconds from older
/// responses); both render as RFC 3339 in UTC.
fn timestamp_text(raw: &str) -> Result<String, DbError> {
    let micros = match raw.parse::<i64>() {
        Ok(micros) => Some(micros),
        Err(_) => raw
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite())
            .map(|secs| (secs * 1_000_000.0).round() as i64),
    };
    micros
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .map(|ts| ts.to_rfc3339())
        .ok_or_else(|| {
            DbError::query(
                "unreadable warehouse response",
                format!("invalid TIMESTAMP value '{}'", raw),
            )
        })
}

fn describe_errors(errors: &[ErrorProto]) -> String {
    errors
        .iter()
        .map(|e| {
            format!(
                "{}: {}",
                e.reason.as_deref().unwrap_or("error"),
                e.message.as_deref().unwrap_or("unknown error")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// The client sets no request timeout, so any transport failure is a connection problem;
/// the caller's deadline is enforced around the whole call.
fn map_transport_error(err: reqwest::Error) -> DbError {
    DbError::Connection {
        message: format!("warehouse unreachable: {}", err),
    }
}

fn map_http_error(status: StatusCode, body: &str, timeout_secs: u64) -> DbError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|env| {
            format!(
                "{} {}",
                env.error.status.unwrap_or_default(),
                env.error.message.unwrap_or_default()
            )
            .trim()
            .to_string()
        })
        .unwrap_or_else(|| body.chars().take(500).collect());

    match status.as_u16() {
        401 => DbError::Connection {
            message: "invalid or expired warehouse token".to_string(),
        },
        403 => DbError::Connection {
            message: "insufficient permissions on the warehouse project".to_string(),
        },
        400 | 404 => DbError::query(
            "backend rejected the statement",
            format!("HTTP {}: {}", status.as_u16(), detail),
        ),
        408 | 504 => DbError::Timeout {
            seconds: timeout_secs,
        },
        _ => DbError::Connection {
            message: format!("HTTP error: {}", status.as_u16()),
        },
    }
}

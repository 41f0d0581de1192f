use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::{BigQueryDialect, Dialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

use crate::error::DbError;
use crate::operation::BackendKind;

pub const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Why a statement was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    WriteStatement,
    SelectInto,
    CteWrappedWrite,
    LockingClause,
    MultipleStatements,
    EmptyStatement,
    ParseFailure,
    Unrecognized,
}

/// A single denial reason.
#[derive(Debug, Clone)]
pub struct DenialReason {
    pub statement_index: usize,
    pub kind: DenialKind,
    pub detail: String,
}

/// Outcome of read-only query validation.
#[derive(Debug)]
pub enum ValidationResult {
    Safe,
    Denied { reasons: Vec<DenialReason> },
}

impl ValidationResult {
    pub fn is_safe(&self) -> bool {
        matches!(self, ValidationResult::Safe)
    }

    /// Collapse a denial into the caller-facing error.
    pub fn into_result(self) -> Result<(), DbError> {
        match self {
            ValidationResult::Safe => Ok(()),
            ValidationResult::Denied { reasons } => {
                let details: Vec<String> = reasons.into_iter().map(|r| r.detail).collect();
                Err(DbError::validation(details.join("; ")))
            }
        }
    }
}

fn dialect_for(backend: BackendKind) -> Box<dyn Dialect> {
    match backend {
        BackendKind::DirectSql => Box::new(PostgreSqlDialect {}),
        BackendKind::Warehouse => Box::new(BigQueryDialect {}),
    }
}

/// Validate that `sql` is exactly one read-only retrieval statement in the backend's dialect.
pub fn validate(sql: &str, backend: BackendKind) -> ValidationResult {
    let dialect = dialect_for(backend);
    let statements = match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(stmts) => stmts,
        Err(e) => {
            return denied(
                0,
                DenialKind::ParseFailure,
                format!("cannot verify query safety: {}", e),
            );
        }
    };

    match statements.len() {
        0 => return denied(0, DenialKind::EmptyStatement, "no statement to execute".to_string()),
        1 => {}
        n => {
            return denied(
                1,
                DenialKind::MultipleStatements,
                format!("expected a single statement, found {}", n),
            );
        }
    }

    let stmt = &statements[0];
    match stmt {
        Statement::Query(query) => match query_denial(query) {
            None => ValidationResult::Safe,
            Some((kind, detail)) => denied(0, kind, detail),
        },
        other => {
            let (kind, detail) = classify_statement(other);
            denied(0, kind, detail)
        }
    }
}

fn denied(statement_index: usize, kind: DenialKind, detail: String) -> ValidationResult {
    ValidationResult::Denied {
        reasons: vec![DenialReason {
            statement_index,
            kind,
            detail,
        }],
    }
}

/// Walk a query, its CTEs and its set-operation branches looking for anything that writes or
/// takes row locks.
fn query_denial(query: &Query) -> Option<(DenialKind, String)> {
    if !query.locks.is_empty() {
        return Some((
            DenialKind::LockingClause,
            "row locking clauses are not allowed in read-only mode".to_string(),
        ));
    }
    if let Some(ref with) = query.with {
        for cte in &with.cte_tables {
            if let Some((kind, detail)) = query_denial(&cte.query) {
                let kind = match kind {
                    DenialKind::WriteStatement => DenialKind::CteWrappedWrite,
                    other => other,
                };
                return Some((kind, detail));
            }
        }
    }
    body_denial(&query.body)
}

fn body_denial(body: &SetExpr) -> Option<(DenialKind, String)> {
    match body {
        SetExpr::Select(select) if select.into.is_some() => Some((
            DenialKind::SelectInto,
            "SELECT INTO would create a table".to_string(),
        )),
        SetExpr::Select(_) | SetExpr::Values(_) | SetExpr::Table(_) => None,
        SetExpr::Query(query) => query_denial(query),
        SetExpr::SetOperation { left, right, .. } => {
            body_denial(left).or_else(|| body_denial(right))
        }
        other => {
            let keyword = leading_keyword(&other.to_string());
            Some((
                DenialKind::CteWrappedWrite,
                format!("CTE-wrapped {} is not allowed in read-only mode", keyword),
            ))
        }
    }
}

/// Name the rejected statement by its leading keyword.
fn classify_statement(stmt: &Statement) -> (DenialKind, String) {
    let keyword = leading_keyword(&stmt.to_string());
    match keyword.as_str() {
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "TRUNCATE" | "REPLACE" | "UPSERT" | "COPY" => (
            DenialKind::WriteStatement,
            format!("query would modify state: {}", keyword),
        ),
        "CREATE" | "DROP" | "ALTER" | "GRANT" | "REVOKE" | "COMMENT" | "RENAME" => (
            DenialKind::WriteStatement,
            format!("query would modify state: DDL ({})", keyword),
        ),
        _ => (
            DenialKind::Unrecognized,
            format!("{} statements are not allowed in read-only mode", keyword),
        ),
    }
}

fn leading_keyword(text: &str) -> String {
    text.split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .trim_matches(|c: char| !c.is_ascii_alphabetic())
        .to_ascii_uppercase()
}

/// Check a schema or table argument before it reaches a template.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), DbError> {
    if value.is_empty() {
        return Err(DbError::validation(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(DbError::validation(format!(
            "{} exceeds {} characters",
            field, MAX_IDENTIFIER_LEN
        )));
    }
    if !IDENTIFIER_RE.is_match(value) {
        return Err(DbError::validation(format!(
            "{} '{}' is not a valid identifier",
            field, value
        )));
    }
    Ok(())
}

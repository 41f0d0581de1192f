use serde::Serialize;
use thiserror::Error;

use crate::operation::BackendKind;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("unsupported operation: {operation} has no template for {backend}")]
    UnsupportedOperation {
        operation: String,
        backend: BackendKind,
    },

    #[error("validation: {reason}")]
    Validation { reason: String },

    #[error("connection: {message}")]
    Connection { message: String },

    #[error("timeout: query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// `message` is safe to show callers; backend text stays in `detail`.
    #[error("query: {message}")]
    Query {
        message: String,
        detail: String,
        view: Option<String>,
    },

    #[error("config: {message}")]
    Config { message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable error category carried on the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    UnsupportedOperation,
    ValidationError,
    ConnectionError,
    TimeoutError,
    QueryError,
    ConfigError,
    IoError,
}

impl DbError {
    pub fn validation(reason: impl Into<String>) -> Self {
        DbError::Validation {
            reason: reason.into(),
        }
    }

    /// A backend rejected or failed a statement.
    pub fn query(message: impl Into<String>, detail: impl Into<String>) -> Self {
        DbError::Query {
            message: message.into(),
            detail: detail.into(),
            view: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            DbError::Validation { .. } => ErrorKind::ValidationError,
            DbError::Connection { .. } => ErrorKind::ConnectionError,
            DbError::Timeout { .. } => ErrorKind::TimeoutError,
            DbError::Query { .. } => ErrorKind::QueryError,
            DbError::Config { .. } => ErrorKind::ConfigError,
            DbError::Io(_) => ErrorKind::IoError,
        }
    }

    /// Diagnostic detail that is kept out of the top-level message.
    pub fn detail(&self) -> Option<&str> {
        match self {
            DbError::Query { detail, .. } if !detail.is_empty() => Some(detail),
            _ => None,
        }
    }

    /// Attach the view that was being migrated when a query failed.
    pub fn at_view(self, name: &str) -> Self {
        match self {
            DbError::Query { detail, .. } => DbError::Query {
                message: format!("view migration failed at {name}"),
                detail,
                view: Some(name.to_string()),
            },
            DbError::Connection { message } => DbError::Query {
                message: format!("view migration failed at {name}"),
                detail: message,
                view: Some(name.to_string()),
            },
            DbError::Timeout { seconds } => DbError::Query {
                message: format!("view migration failed at {name}"),
                detail: format!("timed out after {seconds}s"),
                view: Some(name.to_string()),
            },
            other => other,
        }
    }
}

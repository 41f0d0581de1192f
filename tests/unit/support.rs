//! Shared fixtures: a recording connector and raw-result builders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dbscope::backend::{CellValue, ColumnMeta, Connector, RawResult};
use dbscope::error::DbError;
use dbscope::operation::BackendKind;
use dbscope::template::BoundStatement;

type Responder = Box<dyn Fn(&BoundStatement) -> Result<RawResult, DbError> + Send + Sync>;

/// A connector that records every statement and answers from a closure.
pub struct FakeConnector {
    kind: BackendKind,
    calls: Arc<Mutex<Vec<BoundStatement>>>,
    closed: AtomicBool,
    responder: Responder,
}

impl FakeConnector {
    pub fn new(
        kind: BackendKind,
        responder: impl Fn(&BoundStatement) -> Result<RawResult, DbError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            calls: Arc::new(Mutex::new(Vec::new())),
            closed: AtomicBool::new(false),
            responder: Box::new(responder),
        }
    }

    /// Answers every statement with the same result.
    pub fn returning(kind: BackendKind, raw: RawResult) -> Self {
        Self::new(kind, move |_| Ok(raw.clone()))
    }

    pub fn empty(kind: BackendKind) -> Self {
        Self::returning(kind, RawResult::default())
    }

    pub fn calls(&self) -> Vec<BoundStatement> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn execute(&self, statement: &BoundStatement) -> Result<RawResult, DbError> {
        self.calls.lock().unwrap().push(statement.clone());
        (self.responder)(statement)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn text(s: &str) -> CellValue {
    CellValue::Text(s.to_string())
}

/// A single-column, single-row result holding a JSON document.
pub fn json_payload(payload: &str) -> RawResult {
    RawResult {
        columns: vec![ColumnMeta::new("payload", "TEXT")],
        rows: vec![vec![text(payload)]],
        truncated: false,
    }
}

/// A tabular result; `None` cells are NULL.
pub fn tabular(columns: &[&str], rows: &[&[Option<&str>]]) -> RawResult {
    RawResult {
        columns: columns
            .iter()
            .map(|c| ColumnMeta::new(*c, "STRING"))
            .collect(),
        rows: rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| match cell {
                        Some(s) => text(s),
                        None => CellValue::Null,
                    })
                    .collect()
            })
            .collect(),
        truncated: false,
    }
}

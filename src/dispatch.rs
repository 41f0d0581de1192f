//! Operation dispatch: validate, look up, render, execute, normalize.

use tracing::{debug, info, warn};

use crate::backend::Connector;
use crate::error::DbError;
use crate::normalize::{CanonicalResult, normalize};
use crate::operation::{BackendKind, MAX_PREVIEW_LIMIT, Operation, ParamValue};
use crate::template::{Bindings, TemplateRegistry};
use crate::validation::{validate, validate_identifier};
use crate::verbose::Timer;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_REGION: &str = "region-us";

/// Deployment identifiers that templates may reference alongside operation arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogScope {
    /// Target schema on Postgres; views are created here.
    pub schema: String,
    pub project: String,
    pub dataset: String,
    pub region: String,
    pub description: Option<String>,
}

impl Default for CatalogScope {
    fn default() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            project: String::new(),
            dataset: String::new(),
            region: DEFAULT_REGION.to_string(),
            description: None,
        }
    }
}

impl CatalogScope {
    /// Identifier slots and scope-level values shared by every template.
    pub fn bindings(&self) -> Bindings {
        let mut b = Bindings::new();
        if !self.schema.is_empty() {
            b.set_text("schema", &self.schema);
        }
        if !self.project.is_empty() {
            b.set_text("project", &self.project)
                .set_text("project_id", &self.project);
        }
        if !self.dataset.is_empty() {
            b.set_text("dataset", &self.dataset)
                .set_text("dataset_id", &self.dataset);
        }
        if !self.region.is_empty() {
            b.set_text("region", &self.region);
        }
        b.set(
            "description",
            self.description
                .clone()
                .map(ParamValue::Text)
                .unwrap_or(ParamValue::Null),
        );
        b
    }
}

/// Serves every operation against the one backend its connector talks to.
pub struct Dispatcher<C: Connector> {
    connector: C,
    registry: TemplateRegistry,
    scope: CatalogScope,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(connector: C, registry: TemplateRegistry, scope: CatalogScope) -> Self {
        Self {
            connector,
            registry,
            scope,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.connector.kind()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn scope(&self) -> &CatalogScope {
        &self.scope
    }

    pub async fn dispatch(&self, operation: &Operation) -> Result<CanonicalResult, DbError> {
        let backend = self.backend();
        let kind = operation.kind();
        let timer = Timer::start();

        let outcome = self.run(operation, backend).await;
        let elapsed_ms = timer.elapsed_ms();
        match &outcome {
            Ok(_) => info!(operation = %kind, %backend, elapsed_ms, "dispatch complete"),
            Err(e) => warn!(operation = %kind, %backend, elapsed_ms, error = %e, "dispatch failed"),
        }
        outcome
    }

    async fn run(
        &self,
        operation: &Operation,
        backend: BackendKind,
    ) -> Result<CanonicalResult, DbError> {
        let bindings = self.bind(operation, backend)?;
        let template = self.registry.lookup(operation.kind(), backend)?;
        let statement = template.render(&bindings)?;
        debug!(sql = %statement.sql, params = statement.params.len(), "rendered statement");

        let raw = self.connector.execute(&statement).await?;
        normalize(operation.kind(), raw)
    }

    /// Validate arguments and merge them over the scope bindings. Nothing here touches the
    /// connector.
    fn bind(&self, operation: &Operation, backend: BackendKind) -> Result<Bindings, DbError> {
        let mut bindings = self.scope.bindings();
        match operation {
            Operation::ListSchemas | Operation::ListDatabaseInfo | Operation::ListViews => {}
            Operation::ListTables { schema } => {
                validate_identifier("schema", schema)?;
                bindings.set_text("schema_name", schema);
            }
            Operation::ListColumns { schema, table } => {
                validate_identifier("schema", schema)?;
                validate_identifier("table", table)?;
                bindings
                    .set_text("schema_name", schema)
                    .set_text("table_name", table);
            }
            Operation::PreviewTable {
                schema,
                table,
                limit,
            } => {
                validate_identifier("schema", schema)?;
                validate_identifier("table", table)?;
                if *limit == 0 || *limit > MAX_PREVIEW_LIMIT {
                    return Err(DbError::validation(format!(
                        "limit must be between 1 and {}",
                        MAX_PREVIEW_LIMIT
                    )));
                }
                bindings
                    .set_text("schema", schema)
                    .set_text("table", table)
                    .set("limit", ParamValue::Int(i64::from(*limit)));
            }
            Operation::ExecuteQuery { sql, params } => {
                validate(sql, backend).into_result()?;
                bindings.set_pass_through(sql.clone(), params.clone());
            }
        }
        Ok(bindings)
    }

    pub async fn close(&self) {
        self.connector.close().await;
    }
}

//! Drops and recreates the analytic views, one at a time, in declaration order.
//!
//! Runs are not transactional across views: when view N fails, views before it have already
//! been recreated and stay that way. Every run replays the same statement sequence, so a
//! second run over an unchanged catalog is a no-op in effect.

use std::fmt;

use serde::Serialize;
use tracing::{error, info};

use crate::backend::Connector;
use crate::dispatch::CatalogScope;
use crate::error::DbError;
use crate::operation::BackendKind;
use crate::template::{BoundStatement, splice_identifiers};
use crate::verbose::Timer;

/// A named analytic view with one body per backend.
#[derive(Debug, Clone, Copy)]
pub struct ViewDefinition {
    pub name: &'static str,
    direct_sql: &'static str,
    warehouse: &'static str,
}

impl ViewDefinition {
    pub const fn new(
        name: &'static str,
        direct_sql: &'static str,
        warehouse: &'static str,
    ) -> Self {
        Self {
            name,
            direct_sql,
            warehouse,
        }
    }

    pub fn body(&self, backend: BackendKind) -> &'static str {
        match backend {
            BackendKind::DirectSql => self.direct_sql,
            BackendKind::Warehouse => self.warehouse,
        }
    }
}

pub const BUILTIN_VIEWS: [ViewDefinition; 5] = [
    ViewDefinition::new(
        "top_selling_products",
        include_str!("../sql/postgres/views/top_selling_products.sql"),
        include_str!("../sql/bigquery/views/top_selling_products.sql"),
    ),
    ViewDefinition::new(
        "monthly_sales",
        include_str!("../sql/postgres/views/monthly_sales.sql"),
        include_str!("../sql/bigquery/views/monthly_sales.sql"),
    ),
    ViewDefinition::new(
        "customer_purchase_summary",
        include_str!("../sql/postgres/views/customer_purchase_summary.sql"),
        include_str!("../sql/bigquery/views/customer_purchase_summary.sql"),
    ),
    ViewDefinition::new(
        "sales_by_channel",
        include_str!("../sql/postgres/views/sales_by_channel.sql"),
        include_str!("../sql/bigquery/views/sales_by_channel.sql"),
    ),
    ViewDefinition::new(
        "product_type_customer_age",
        include_str!("../sql/postgres/views/product_type_customer_age.sql"),
        include_str!("../sql/bigquery/views/product_type_customer_age.sql"),
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "view", rename_all = "snake_case")]
pub enum MigrationState {
    NotStarted,
    Dropping(String),
    Creating(String),
    Done,
    Failed { view: String, cause: String },
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::NotStarted => f.write_str("not started"),
            MigrationState::Dropping(v) => write!(f, "dropping {v}"),
            MigrationState::Creating(v) => write!(f, "creating {v}"),
            MigrationState::Done => f.write_str("done"),
            MigrationState::Failed { view, cause } => write!(f, "failed at {view}: {cause}"),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub backend: BackendKind,
    pub recreated: Vec<String>,
    pub elapsed_ms: u64,
}

pub struct Migrator<C: Connector> {
    connector: C,
    scope: CatalogScope,
    views: Vec<ViewDefinition>,
    transitions: Vec<MigrationState>,
}

impl<C: Connector> Migrator<C> {
    pub fn new(connector: C, scope: CatalogScope) -> Self {
        Self::with_views(connector, scope, BUILTIN_VIEWS.to_vec())
    }

    pub fn with_views(connector: C, scope: CatalogScope, views: Vec<ViewDefinition>) -> Self {
        Self {
            connector,
            scope,
            views,
            transitions: vec![MigrationState::NotStarted],
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> &MigrationState {
        self.transitions
            .last()
            .unwrap_or(&MigrationState::NotStarted)
    }

    /// Every state the most recent run passed through, starting with `NotStarted`.
    pub fn transitions(&self) -> &[MigrationState] {
        &self.transitions
    }

    pub async fn run(&mut self) -> Result<MigrationReport, DbError> {
        let backend = self.connector.kind();
        let timer = Timer::start();
        self.transitions = vec![MigrationState::NotStarted];
        let mut recreated = Vec::with_capacity(self.views.len());

        let views = self.views.clone();
        for view in &views {
            if let Err(e) = self.recreate(view, backend).await {
                let cause = e.detail().map(str::to_string).unwrap_or_else(|| e.to_string());
                self.advance(MigrationState::Failed {
                    view: view.name.to_string(),
                    cause,
                });
                error!(
                    view = view.name,
                    recreated = ?recreated,
                    error = %e,
                    "view migration stopped"
                );
                return Err(e.at_view(view.name));
            }
            recreated.push(view.name.to_string());
        }

        self.advance(MigrationState::Done);
        let report = MigrationReport {
            backend,
            recreated,
            elapsed_ms: timer.elapsed_ms(),
        };
        info!(
            %backend,
            views = report.recreated.len(),
            elapsed_ms = report.elapsed_ms,
            "view migration complete"
        );
        Ok(report)
    }

    async fn recreate(
        &mut self,
        view: &ViewDefinition,
        backend: BackendKind,
    ) -> Result<(), DbError> {
        let (drop_sql, create_sql) = self.statements(view, backend)?;

        self.advance(MigrationState::Dropping(view.name.to_string()));
        self.connector
            .execute(&BoundStatement::unparameterized(drop_sql))
            .await?;

        self.advance(MigrationState::Creating(view.name.to_string()));
        self.connector
            .execute(&BoundStatement::unparameterized(create_sql))
            .await?;
        Ok(())
    }

    /// The DROP and CREATE statements for one view, with every identifier slot resolved.
    pub fn statements(
        &self,
        view: &ViewDefinition,
        backend: BackendKind,
    ) -> Result<(String, String), DbError> {
        let mut bindings = self.scope.bindings();
        bindings.set_text("view", view.name);
        let splice = |text: &str| {
            splice_identifiers(text, backend, &bindings).map_err(|slot| DbError::Config {
                message: format!(
                    "view {} needs a valid '{}' in the catalog scope",
                    view.name, slot
                ),
            })
        };

        let (qualified, cascade) = match backend {
            BackendKind::DirectSql => (splice("{schema}.{view}")?, " CASCADE"),
            BackendKind::Warehouse => (splice("{project}.{dataset}.{view}")?, ""),
        };
        let body = splice(view.body(backend).trim().trim_end_matches(';'))?;

        Ok((
            format!("DROP VIEW IF EXISTS {qualified}{cascade}"),
            format!("CREATE VIEW {qualified} AS\n{body}"),
        ))
    }

    fn advance(&mut self, next: MigrationState) {
        info!(from = %self.state(), to = %next, "migration state");
        self.transitions.push(next);
    }

    pub async fn close(&self) {
        self.connector.close().await;
    }
}

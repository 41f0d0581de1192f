//! Dialect template registry.
//!
//! Every `(OperationKind, BackendKind)` pair maps to exactly one template. Template text is
//! written in the backend's native placeholder syntax (`$n` for Postgres, `@name` for
//! BigQuery) and may contain `{slot}` identifier placeholders, which are validated and quoted
//! for the dialect when the template is rendered.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::DbError;
use crate::operation::{BackendKind, OperationKind, ParamValue};

/// Where the warehouse's schema and database-info listings come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogMode {
    /// Query `INFORMATION_SCHEMA` on every call.
    #[default]
    Live,
    /// Answer from the configured project/dataset without touching the catalog.
    Literal,
}

impl CatalogMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "live" => Some(CatalogMode::Live),
            "literal" => Some(CatalogMode::Literal),
            _ => None,
        }
    }
}

/// A single bound value, named when the dialect binds by name.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub name: Option<String>,
    pub value: ParamValue,
}

/// Statement text ready for the connector, with its native binds.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<BoundParam>,
    /// Caller-supplied SQL forwarded after read-only validation.
    pub pass_through: bool,
}

impl BoundStatement {
    /// A statement with no bound values, as used for DDL.
    pub fn unparameterized(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            pass_through: false,
        }
    }
}

/// Values available to a template while rendering.
#[derive(Debug, Default, Clone)]
pub struct Bindings {
    values: HashMap<&'static str, ParamValue>,
    pass_through: Option<(String, Vec<ParamValue>)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &'static str, value: ParamValue) -> &mut Self {
        self.values.insert(name, value);
        self
    }

    pub fn set_text(&mut self, name: &'static str, value: &str) -> &mut Self {
        self.set(name, ParamValue::Text(value.to_string()))
    }

    pub fn set_pass_through(&mut self, sql: String, params: Vec<ParamValue>) -> &mut Self {
        self.pass_through = Some((sql, params));
        self
    }

    fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }
}

#[derive(Debug, Clone)]
enum TemplateBody {
    Static {
        sql: &'static str,
        params: &'static [&'static str],
    },
    PassThrough,
}

#[derive(Debug, Clone)]
pub struct Template {
    operation: OperationKind,
    backend: BackendKind,
    body: TemplateBody,
}

impl Template {
    /// A fixed statement. `params` lists the bound values in `$n` order for Postgres; for
    /// BigQuery the names match the `@name` placeholders.
    pub fn fixed(
        operation: OperationKind,
        backend: BackendKind,
        sql: &'static str,
        params: &'static [&'static str],
    ) -> Self {
        Self {
            operation,
            backend,
            body: TemplateBody::Static { sql, params },
        }
    }

    /// Forwards the caller's statement and positional parameters unchanged.
    pub fn pass_through(operation: OperationKind, backend: BackendKind) -> Self {
        Self {
            operation,
            backend,
            body: TemplateBody::PassThrough,
        }
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn render(&self, bindings: &Bindings) -> Result<BoundStatement, DbError> {
        match &self.body {
            TemplateBody::PassThrough => {
                let (sql, params) = bindings
                    .pass_through
                    .clone()
                    .ok_or_else(|| self.unbound("statement"))?;
                Ok(BoundStatement {
                    sql: strip_trailing_semicolons(&sql).to_string(),
                    params: params
                        .into_iter()
                        .map(|value| BoundParam { name: None, value })
                        .collect(),
                    pass_through: true,
                })
            }
            TemplateBody::Static { sql, params } => {
                let sql = splice_identifiers(sql, self.backend, bindings)
                    .map_err(|slot| self.unbound(&slot))?;
                let params = params
                    .iter()
                    .map(|name| {
                        let value = bindings.get(name).cloned().ok_or_else(|| self.unbound(name))?;
                        let name = match self.backend {
                            BackendKind::DirectSql => None,
                            BackendKind::Warehouse => Some(name.to_string()),
                        };
                        Ok(BoundParam { name, value })
                    })
                    .collect::<Result<Vec<_>, DbError>>()?;
                Ok(BoundStatement {
                    sql,
                    params,
                    pass_through: false,
                })
            }
        }
    }

    fn unbound(&self, slot: &str) -> DbError {
        DbError::UnsupportedOperation {
            operation: format!("{} (unbound template slot '{}')", self.operation, slot),
            backend: self.backend,
        }
    }
}

static SLOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-z_]+)\}").expect("slot pattern is valid")
});

static SPLICE_SAFE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-]{1,128}$").expect("identifier pattern is valid")
});

/// Quote an identifier for the dialect.
pub fn quote_identifier(ident: &str, backend: BackendKind) -> String {
    match backend {
        BackendKind::DirectSql => format!("\"{}\"", ident.replace('"', "\"\"")),
        BackendKind::Warehouse => format!("`{}`", ident.replace('`', "\\`")),
    }
}

/// Replace `{slot}` placeholders with quoted identifiers. Returns the name of the first slot
/// that has no text binding or whose value is not a plain identifier.
pub(crate) fn splice_identifiers(
    text: &str,
    backend: BackendKind,
    bindings: &Bindings,
) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in SLOT_RE.captures_iter(text) {
        let (Some(whole), Some(slot)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let ident = match bindings.get(slot.as_str()) {
            Some(ParamValue::Text(s)) if SPLICE_SAFE_RE.is_match(s) => s,
            _ => return Err(slot.as_str().to_string()),
        };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&quote_identifier(ident, backend));
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn strip_trailing_semicolons(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Immutable `(operation, backend) → template` map, checked for completeness on construction.
#[derive(Debug)]
pub struct TemplateRegistry {
    templates: HashMap<(OperationKind, BackendKind), Template>,
}

impl TemplateRegistry {
    /// Build a registry from explicit templates. Fails if any operation lacks a template for
    /// any backend, or if a pair is defined twice.
    pub fn new(templates: Vec<Template>) -> Result<Self, DbError> {
        let mut map = HashMap::with_capacity(templates.len());
        for template in templates {
            let key = (template.operation, template.backend);
            if map.insert(key, template).is_some() {
                return Err(DbError::Config {
                    message: format!("duplicate template for {} on {}", key.0, key.1),
                });
            }
        }

        let missing = OperationKind::ALL
            .iter()
            .flat_map(|op| BackendKind::ALL.iter().map(move |b| (*op, *b)))
            .filter(|key| !map.contains_key(key))
            .map(|(op, b)| format!("{op}/{b}"))
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(DbError::Config {
                message: format!("incomplete template registry, missing: {}", missing.join(", ")),
            });
        }

        Ok(Self { templates: map })
    }

    /// The built-in template sets for both backends.
    pub fn builtin(catalog_mode: CatalogMode) -> Result<Self, DbError> {
        debug!(?catalog_mode, "loading builtin templates");
        Self::new(builtin_templates(catalog_mode))
    }

    pub fn lookup(
        &self,
        operation: OperationKind,
        backend: BackendKind,
    ) -> Result<&Template, DbError> {
        self.templates
            .get(&(operation, backend))
            .ok_or_else(|| DbError::UnsupportedOperation {
                operation: operation.to_string(),
                backend,
            })
    }
}

fn builtin_templates(catalog_mode: CatalogMode) -> Vec<Template> {
    use BackendKind::{DirectSql, Warehouse};
    use OperationKind::*;

    let (wh_schemas, wh_schemas_params): (&'static str, &'static [&'static str]) =
        match catalog_mode {
            CatalogMode::Live => (include_str!("../sql/bigquery/list_schemas.sql"), &[]),
            CatalogMode::Literal => (
                include_str!("../sql/bigquery/list_schemas_literal.sql"),
                &["dataset_id"],
            ),
        };
    let wh_info = match catalog_mode {
        CatalogMode::Live => include_str!("../sql/bigquery/list_database_info.sql"),
        CatalogMode::Literal => include_str!("../sql/bigquery/list_database_info_literal.sql"),
    };

    vec![
        // Postgres
        Template::fixed(
            ListSchemas,
            DirectSql,
            include_str!("../sql/postgres/list_schemas.sql"),
            &[],
        ),
        Template::fixed(
            ListTables,
            DirectSql,
            include_str!("../sql/postgres/list_tables.sql"),
            &["schema_name"],
        ),
        Template::fixed(
            ListColumns,
            DirectSql,
            include_str!("../sql/postgres/list_columns.sql"),
            &["schema_name", "table_name"],
        ),
        Template::fixed(
            ListDatabaseInfo,
            DirectSql,
            include_str!("../sql/postgres/list_database_info.sql"),
            &[],
        ),
        Template::pass_through(ExecuteQuery, DirectSql),
        Template::fixed(
            ListViews,
            DirectSql,
            include_str!("../sql/postgres/list_views.sql"),
            &[],
        ),
        Template::fixed(
            PreviewTable,
            DirectSql,
            include_str!("../sql/postgres/preview_table.sql"),
            &["limit"],
        ),
        // BigQuery
        Template::fixed(ListSchemas, Warehouse, wh_schemas, wh_schemas_params),
        Template::fixed(
            ListTables,
            Warehouse,
            include_str!("../sql/bigquery/list_tables.sql"),
            &["schema_name"],
        ),
        Template::fixed(
            ListColumns,
            Warehouse,
            include_str!("../sql/bigquery/list_columns.sql"),
            &["schema_name", "table_name"],
        ),
        Template::fixed(
            ListDatabaseInfo,
            Warehouse,
            wh_info,
            &["project_id", "description"],
        ),
        Template::pass_through(ExecuteQuery, Warehouse),
        Template::fixed(
            ListViews,
            Warehouse,
            include_str!("../sql/bigquery/list_views.sql"),
            &[],
        ),
        Template::fixed(
            PreviewTable,
            Warehouse,
            include_str!("../sql/bigquery/preview_table.sql"),
            &["limit"],
        ),
    ]
}

use crate::backend::bigquery::{BigQuerySettings, DEFAULT_ENDPOINT};
use crate::backend::postgres::{DEFAULT_POOL_SIZE, PostgresSettings};
use crate::cli::{ConnectionArgs, OutputFormat};
use crate::dispatch::{CatalogScope, DEFAULT_REGION, DEFAULT_SCHEMA};
use crate::error::DbError;
use crate::masking::Masked;
use crate::operation::BackendKind;
use crate::template::CatalogMode;
use directories::ProjectDirs;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_ROW_LIMIT: usize = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PG_PORT: u16 = 5432;

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub scope: CatalogScope,
    pub catalog_mode: CatalogMode,
    pub row_limit: Option<usize>,
    pub query_timeout_secs: u64,
    pub verbose: bool,
    pub show_secrets: bool,
    pub output_format: OutputFormat,
}

/// Configured database connection target.
#[derive(Debug)]
pub enum BackendConfig {
    Postgres(PostgresSettings),
    BigQuery(BigQuerySettings),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Postgres(_) => BackendKind::DirectSql,
            BackendConfig::BigQuery(_) => BackendKind::Warehouse,
        }
    }
}

impl AppConfig {
    /// One-line summary for diagnostics, with credentials masked unless `show_secrets`.
    pub fn describe(&self) -> String {
        match &self.backend {
            BackendConfig::Postgres(pg) => format!(
                "backend=postgres host={} port={} database={} user={} password={} schema={}",
                pg.host,
                pg.port,
                pg.database,
                pg.user,
                Masked::new(pg.password.as_ref(), self.show_secrets),
                self.scope.schema,
            ),
            BackendConfig::BigQuery(bq) => format!(
                "backend=bigquery endpoint={} project={} dataset={} region={} token={} catalog_mode={:?}",
                bq.endpoint,
                bq.project,
                bq.dataset,
                self.scope.region,
                Masked::new(bq.token.as_ref(), self.show_secrets),
                self.catalog_mode,
            ),
        }
    }
}

// --- TOML config file structs ---

#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    #[serde(default)]
    defaults: TomlDefaults,
    #[serde(default)]
    profiles: HashMap<String, TomlProfile>,
}

#[derive(Debug, Deserialize, Default)]
struct TomlDefaults {
    row_limit: Option<usize>,
    timeout: Option<u64>,
    verbose: Option<bool>,
    output_format: Option<OutputFormat>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
struct TomlProfile {
    backend: Option<String>,
    // postgres
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    user: Option<String>,
    password: Option<String>,
    password_env: Option<String>,
    schema: Option<String>,
    pool_size: Option<u32>,
    // bigquery
    project: Option<String>,
    dataset: Option<String>,
    region: Option<String>,
    location: Option<String>,
    token: Option<String>,
    token_env: Option<String>,
    endpoint: Option<String>,
    catalog_mode: Option<CatalogMode>,
    description: Option<String>,
}

/// Config path resolution result; distinguishes explicit vs auto-resolved paths.
struct ResolvedConfigPath {
    path: PathBuf,
    /// true if the user named the file via --config or DBSCOPE_CONFIG
    explicit: bool,
}

/// Resolve the config file path: --config flag > env var > platform default.
fn resolve_config_path(cli_config: Option<&PathBuf>) -> Option<ResolvedConfigPath> {
    if let Some(path) = cli_config {
        return Some(ResolvedConfigPath {
            path: path.clone(),
            explicit: true,
        });
    }
    if let Ok(path) = std::env::var("DBSCOPE_CONFIG") {
        return Some(ResolvedConfigPath {
            path: PathBuf::from(path),
            explicit: true,
        });
    }
    ProjectDirs::from("", "", "dbscope").map(|dirs| ResolvedConfigPath {
        path: dirs.config_dir().join("config.toml"),
        explicit: false,
    })
}

/// Load and parse the TOML config file (if it exists).
fn load_toml_config(resolved: Option<&ResolvedConfigPath>) -> Result<TomlConfig, DbError> {
    let resolved = match resolved {
        Some(r) => r,
        None => return Ok(TomlConfig::default()),
    };

    if !resolved.path.exists() {
        if resolved.explicit {
            return Err(DbError::Config {
                message: format!("config file not found: {}", resolved.path.display()),
            });
        }
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&resolved.path).map_err(|e| DbError::Config {
        message: format!("cannot read config file {}: {}", resolved.path.display(), e),
    })?;

    toml::from_str(&content).map_err(|e| DbError::Config {
        message: format!("invalid config file {}: {}", resolved.path.display(), e),
    })
}

/// Treat an empty string the same as an absent value.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Read an environment variable, treating empty as unset.
pub fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// CLI/DBSCOPE env > profile > standard env var (PGHOST, GOOGLE_CLOUD_PROJECT, ...).
fn pick(cli: Option<&str>, profile: Option<&str>, std_env: &str) -> Option<String> {
    non_empty(cli)
        .or(non_empty(profile))
        .map(str::to_string)
        .or_else(|| env_non_empty(std_env))
}

/// Resolve a secret: CLI/env value, then the profile's env indirection, then the profile
/// literal, then the standard env var.
fn resolve_secret(
    direct: Option<&str>,
    env_key: Option<&str>,
    literal: Option<&str>,
    std_env: &str,
) -> Option<SecretString> {
    non_empty(direct)
        .map(str::to_string)
        // e.g. password_env = "SHOP_DB_PASSWORD"
        .or_else(|| env_key.and_then(env_non_empty))
        .or_else(|| non_empty(literal).map(str::to_string))
        .or_else(|| env_non_empty(std_env))
        .map(SecretString::from)
}

fn required(value: Option<String>, what: &str, backend: &str) -> Result<String, DbError> {
    value.ok_or_else(|| DbError::Config {
        message: format!("no {} specified for {} backend", what, backend),
    })
}

/// Build the application configuration. Each value resolves CLI/env > profile > standard env
/// > default.
pub fn load(
    args: &ConnectionArgs,
    verbose: bool,
    show_secrets: bool,
    output_format: Option<OutputFormat>,
    config_path: Option<&PathBuf>,
) -> Result<AppConfig, DbError> {
    let resolved_path = resolve_config_path(config_path);
    let toml_config = load_toml_config(resolved_path.as_ref())?;

    let profile = args
        .profile
        .as_ref()
        .map(|name| {
            toml_config
                .profiles
                .get(name)
                .cloned()
                .ok_or_else(|| DbError::Config {
                    message: format!("profile '{}' not found in config file", name),
                })
        })
        .transpose()?
        .unwrap_or_default();

    let backend_str = args
        .backend
        .as_deref()
        .or(profile.backend.as_deref())
        .ok_or_else(|| DbError::Config {
            message: "no backend specified; use --backend or configure a profile".to_string(),
        })?;

    let catalog_mode = match args.catalog_mode.as_deref() {
        Some(raw) => CatalogMode::parse(raw).ok_or_else(|| DbError::Config {
            message: format!("unknown catalog mode '{}' (expected 'live' or 'literal')", raw),
        })?,
        None => profile.catalog_mode.unwrap_or_default(),
    };

    let mut scope = CatalogScope {
        description: profile.description.clone(),
        ..CatalogScope::default()
    };

    let backend = match backend_str {
        "postgres" | "postgresql" => {
            let host = required(
                pick(args.host.as_deref(), profile.host.as_deref(), "PGHOST"),
                "host",
                "postgres",
            )?;
            let database = required(
                pick(args.database.as_deref(), profile.database.as_deref(), "PGDATABASE"),
                "database",
                "postgres",
            )?;
            let user = required(
                pick(args.user.as_deref(), profile.user.as_deref(), "PGUSER"),
                "user",
                "postgres",
            )?;
            let password = resolve_secret(
                args.password.as_deref(),
                profile.password_env.as_deref(),
                profile.password.as_deref(),
                "PGPASSWORD",
            );
            let port = match args.port.or(profile.port) {
                Some(p) => p,
                None => match env_non_empty("PGPORT") {
                    Some(raw) => raw.parse().map_err(|_| DbError::Config {
                        message: format!("invalid PGPORT value '{}'", raw),
                    })?,
                    None => DEFAULT_PG_PORT,
                },
            };
            scope.schema = non_empty(args.schema.as_deref())
                .or(non_empty(profile.schema.as_deref()))
                .unwrap_or(DEFAULT_SCHEMA)
                .to_string();

            BackendConfig::Postgres(PostgresSettings {
                host,
                port,
                database,
                user,
                password,
                pool_size: profile.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
            })
        }
        "bigquery" => {
            let project = required(
                pick(
                    args.project.as_deref(),
                    profile.project.as_deref(),
                    "GOOGLE_CLOUD_PROJECT",
                ),
                "project",
                "bigquery",
            )?;
            let dataset = required(
                pick(args.dataset.as_deref(), profile.dataset.as_deref(), "BIGQUERY_DATASET"),
                "dataset",
                "bigquery",
            )?;
            let token = resolve_secret(
                args.token.as_deref(),
                profile.token_env.as_deref(),
                profile.token.as_deref(),
                "GOOGLE_OAUTH_ACCESS_TOKEN",
            );
            scope.project = project.clone();
            scope.dataset = dataset.clone();
            scope.region = non_empty(args.region.as_deref())
                .or(non_empty(profile.region.as_deref()))
                .unwrap_or(DEFAULT_REGION)
                .to_string();

            BackendConfig::BigQuery(BigQuerySettings {
                endpoint: pick(
                    args.endpoint.as_deref(),
                    profile.endpoint.as_deref(),
                    "BIGQUERY_ENDPOINT_URL",
                )
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                project,
                dataset,
                location: profile.location.clone(),
                token,
            })
        }
        other => {
            return Err(DbError::Config {
                message: format!(
                    "unknown backend type: '{}' (expected 'postgres' or 'bigquery')",
                    other
                ),
            });
        }
    };

    // row_limit: --no-limit > CLI/ENV > TOML > 500
    let row_limit = if args.no_limit {
        None
    } else {
        let limit = args
            .row_limit
            .unwrap_or_else(|| toml_config.defaults.row_limit.unwrap_or(DEFAULT_ROW_LIMIT));
        if limit == 0 {
            return Err(DbError::Config {
                message: "row limit must be at least 1; use --no-limit to return every row"
                    .to_string(),
            });
        }
        Some(limit)
    };

    let query_timeout_secs = args
        .timeout
        .unwrap_or_else(|| toml_config.defaults.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS));
    if query_timeout_secs == 0 {
        return Err(DbError::Config {
            message: "timeout must be at least 1 second".to_string(),
        });
    }

    Ok(AppConfig {
        backend,
        scope,
        catalog_mode,
        row_limit,
        query_timeout_secs,
        verbose: verbose || toml_config.defaults.verbose.unwrap_or(false),
        show_secrets,
        output_format: output_format
            .or(toml_config.defaults.output_format)
            .unwrap_or_default(),
    })
}

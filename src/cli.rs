use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "dbscope",
    about = "Schema introspection and curated analytics over Postgres and BigQuery"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short = 'c', long, global = true, env = "DBSCOPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit diagnostics to stderr
    #[arg(short = 'v', long, global = true, env = "DBSCOPE_VERBOSE")]
    pub verbose: bool,

    /// Disable credential masking
    #[arg(long, global = true, env = "DBSCOPE_SHOW_SECRETS")]
    pub show_secrets: bool,

    /// Output format
    #[arg(long, global = true, value_enum, env = "DBSCOPE_FORMAT")]
    pub format: Option<OutputFormat>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Toon,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List schemas (datasets) with descriptions
    #[command(name = "list-schemas")]
    ListSchemas,

    /// List tables in a schema
    #[command(name = "list-tables")]
    ListTables { schema: String },

    /// List columns of a table
    #[command(name = "list-columns")]
    ListColumns { schema: String, table: String },

    /// Show the database (project) name and description
    #[command(name = "database-info")]
    DatabaseInfo,

    /// Execute a read-only query
    #[command(name = "exec-read")]
    ExecRead(ExecArgs),

    /// List analytic views with their definitions
    #[command(name = "list-views")]
    ListViews,

    /// Show the first rows of a table or view
    Preview {
        schema: String,
        table: String,

        /// Number of rows (1-1000)
        #[arg(short = 'n', long, default_value_t = crate::operation::DEFAULT_PREVIEW_LIMIT)]
        limit: u32,
    },

    /// Drop and recreate the analytic views
    #[command(name = "migrate-views")]
    MigrateViews,

    /// Answer line-delimited JSON requests on stdin
    Serve,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// SQL query text
    pub sql: Option<String>,

    /// Read SQL from file
    #[arg(short = 'f', long = "file", conflicts_with = "sql")]
    pub sql_file: Option<PathBuf>,

    /// Positional parameter value, repeatable ($1.. on Postgres, ? on BigQuery)
    #[arg(long = "param")]
    pub params: Vec<String>,
}

/// Connection settings shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// Config file profile name
    #[arg(short = 'P', long, global = true, env = "DBSCOPE_PROFILE")]
    pub profile: Option<String>,

    /// Backend type: postgres or bigquery
    #[arg(short = 'b', long, global = true, env = "DBSCOPE_BACKEND")]
    pub backend: Option<String>,

    /// Postgres host
    #[arg(long, global = true, env = "DBSCOPE_HOST")]
    pub host: Option<String>,

    /// Postgres port
    #[arg(long, global = true, env = "DBSCOPE_PORT")]
    pub port: Option<u16>,

    /// Postgres database name
    #[arg(short = 'd', long, global = true, env = "DBSCOPE_DATABASE")]
    pub database: Option<String>,

    /// Postgres user
    #[arg(short = 'u', long, global = true, env = "DBSCOPE_USER")]
    pub user: Option<String>,

    /// Postgres password
    #[arg(short = 'p', long, global = true, env = "DBSCOPE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Postgres schema that holds the analytic views
    #[arg(long, global = true, env = "DBSCOPE_SCHEMA")]
    pub schema: Option<String>,

    /// BigQuery project id
    #[arg(long, global = true, env = "DBSCOPE_PROJECT")]
    pub project: Option<String>,

    /// BigQuery dataset id
    #[arg(long, global = true, env = "DBSCOPE_DATASET")]
    pub dataset: Option<String>,

    /// BigQuery INFORMATION_SCHEMA region qualifier (default: region-us)
    #[arg(long, global = true, env = "DBSCOPE_REGION")]
    pub region: Option<String>,

    /// BigQuery OAuth access token
    #[arg(long, global = true, env = "DBSCOPE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// BigQuery REST endpoint
    #[arg(long, global = true, env = "DBSCOPE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Catalog source for BigQuery schema and database listings: live or literal
    #[arg(long, global = true, env = "DBSCOPE_CATALOG_MODE")]
    pub catalog_mode: Option<String>,

    /// Max rows to return (default: 500)
    #[arg(short = 'l', long = "row-limit", global = true, env = "DBSCOPE_ROW_LIMIT")]
    pub row_limit: Option<usize>,

    /// Disable row limit
    #[arg(long, global = true)]
    pub no_limit: bool,

    /// Query timeout in seconds (default: 60)
    #[arg(short = 't', long, global = true, env = "DBSCOPE_TIMEOUT")]
    pub timeout: Option<u64>,
}

use clap::Parser;
use dbscope::backend::bigquery::BigQueryConnector;
use dbscope::backend::postgres::PostgresConnector;
use dbscope::backend::{AnyConnector, Connector};
use dbscope::cli::{self, Cli, Command};
use dbscope::config::{self, AppConfig, BackendConfig};
use dbscope::dispatch::Dispatcher;
use dbscope::error::DbError;
use dbscope::migrate::Migrator;
use dbscope::operation::{Operation, ParamValue};
use dbscope::template::TemplateRegistry;
use dbscope::{format, output, rpc, verbose};
use std::process;
use tracing::{debug, info};

#[tokio::main]
async fn main() {
    // Load .env file (optional, ignore if missing)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        output::print_error(&err);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), DbError> {
    let app_config = config::load(
        &cli.connection,
        cli.verbose,
        cli.show_secrets,
        cli.format,
        cli.config.as_ref(),
    )?;
    verbose::init_logging(app_config.verbose);
    debug!(config = %app_config.describe(), "configuration resolved");

    let output_format = app_config.output_format;
    let scope = app_config.scope.clone();
    let catalog_mode = app_config.catalog_mode;
    let connector = build_connector(app_config)?;

    if let Command::MigrateViews = cli.command {
        let mut migrator = Migrator::new(connector, scope);
        let result = migrator.run().await;
        migrator.close().await;
        let report = result?;
        output::print_result(&format::render(&report, output_format)?);
        return Ok(());
    }

    info!(backend = %connector.kind(), ?catalog_mode, "starting");
    let registry = TemplateRegistry::builtin(catalog_mode)?;
    let dispatcher = Dispatcher::new(connector, registry, scope);

    let result = match cli.command {
        Command::Serve => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            rpc::serve(&dispatcher, stdin, tokio::io::stdout()).await
        }
        other => match to_operation(other) {
            Ok(operation) => run_operation(&dispatcher, &operation, output_format).await,
            Err(e) => Err(e),
        },
    };

    dispatcher.close().await;
    result
}

async fn run_operation(
    dispatcher: &Dispatcher<AnyConnector>,
    operation: &Operation,
    output_format: cli::OutputFormat,
) -> Result<(), DbError> {
    let result = dispatcher.dispatch(operation).await?;
    output::print_result(&format::render(&result, output_format)?);
    if let Some(notice) = format::truncation_notice(&result) {
        output::print_truncation_warning(&notice);
    }
    Ok(())
}

fn build_connector(app_config: AppConfig) -> Result<AnyConnector, DbError> {
    let AppConfig {
        backend,
        row_limit,
        query_timeout_secs,
        ..
    } = app_config;

    match backend {
        BackendConfig::Postgres(settings) => {
            info!(host = %settings.host, database = %settings.database, "using postgres");
            Ok(AnyConnector::Postgres(PostgresConnector::new(
                &settings,
                query_timeout_secs,
                row_limit,
            )))
        }
        BackendConfig::BigQuery(settings) => {
            info!(project = %settings.project, dataset = %settings.dataset, "using bigquery");
            Ok(AnyConnector::BigQuery(BigQueryConnector::new(
                settings,
                query_timeout_secs,
                row_limit,
            )?))
        }
    }
}

fn to_operation(command: Command) -> Result<Operation, DbError> {
    let op = match command {
        Command::ListSchemas => Operation::ListSchemas,
        Command::ListTables { schema } => Operation::ListTables { schema },
        Command::ListColumns { schema, table } => Operation::ListColumns { schema, table },
        Command::DatabaseInfo => Operation::ListDatabaseInfo,
        Command::ListViews => Operation::ListViews,
        Command::Preview {
            schema,
            table,
            limit,
        } => Operation::PreviewTable {
            schema,
            table,
            limit,
        },
        Command::ExecRead(args) => Operation::ExecuteQuery {
            sql: resolve_sql(&args)?,
            params: args.params.iter().map(|p| ParamValue::parse_cli(p)).collect(),
        },
        Command::MigrateViews | Command::Serve => {
            return Err(DbError::Config {
                message: "command is not a catalog operation".to_string(),
            });
        }
    };
    Ok(op)
}

// --- Helpers ---

fn resolve_sql(args: &cli::ExecArgs) -> Result<String, DbError> {
    if let Some(ref sql) = args.sql {
        return Ok(sql.clone());
    }
    if let Some(ref path) = args.sql_file {
        let content = std::fs::read_to_string(path).map_err(|e| DbError::Config {
            message: format!("cannot read SQL file {}: {}", path.display(), e),
        })?;
        return Ok(content);
    }
    Err(DbError::Config {
        message: "no SQL provided; use positional argument or --file".to_string(),
    })
}

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dbmedic::config::{AppConfig, DbConfig, OptimizerSettings, RiskLevel};
use dbmedic::db::mysql::MySqlDatabase;
use dbmedic::reporter::{ReportFormat, Reporter};
use dbmedic::service::Optimizer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// MySQL schema optimizer - diagnoses tables and applies risk-gated fixes with backups
#[derive(Parser, Debug)]
#[command(name = "dbmedic")]
#[command(version = "0.1.0")]
#[command(about = "MySQL schema diagnosis and optimization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML file with `database` and `settings` sections
    #[arg(short = 'c', long = "config", global = true)]
    config_path: Option<String>,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Table prefix (overrides the config file)
    #[arg(long = "prefix", global = true)]
    prefix: Option<String>,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "markdown", global = true)]
    format: ReportFormat,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Database host
    #[arg(
        short = 'H',
        long = "host",
        env = "MYSQL_HOST",
        default_value = "localhost",
        global = true
    )]
    host: String,

    /// Database port
    #[arg(long = "port", env = "MYSQL_PORT", default_value = "3306", global = true)]
    port: u16,

    /// Database name
    #[arg(short = 'd', long = "database", env = "MYSQL_DATABASE", global = true)]
    database: Option<String>,

    /// Username
    #[arg(short = 'u', long = "username", env = "MYSQL_USER", global = true)]
    username: Option<String>,

    /// Password
    #[arg(
        short = 'p',
        long = "password",
        env = "MYSQL_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Diagnose every table and rank recommendations (read-only)
    Analyze,
    /// Collect server telemetry for the next analysis
    Collect,
    /// Analyze, back up if required, then apply fixes allowed at the risk level
    Optimize {
        /// Risk level (defaults to the configured level)
        #[arg(long = "risk", value_enum)]
        risk: Option<RiskLevel>,
    },
    /// Write a restorable SQL backup
    Backup {
        /// Risk level deciding which tables are covered
        #[arg(long = "risk", value_enum)]
        risk: Option<RiskLevel>,
    },
    /// Restore a recorded backup by id
    Restore {
        /// Backup id from `backups`
        id: i64,
    },
    /// List recorded backups, newest first
    Backups {
        /// Maximum number of entries
        #[arg(long = "limit")]
        limit: Option<usize>,
    },
    /// Perform one scheduled run (no-op unless auto_optimize is set)
    Run,
    /// Run scheduled optimizations at the configured frequency until interrupted
    Schedule,
}

fn load_config(cli: &Cli) -> anyhow::Result<(DbConfig, OptimizerSettings)> {
    let (database, mut settings) = match &cli.config_path {
        Some(path) => {
            info!("Loading config from: {}", path);
            let config = AppConfig::from_config_file(path)?;
            (config.database, config.settings)
        }
        None => {
            let args = &cli.connection;
            let database = DbConfig::from_connection_params(
                args.host.clone(),
                args.port,
                args.database
                    .clone()
                    .context("--database (or MYSQL_DATABASE) is required without --config")?,
                args.username
                    .clone()
                    .context("--username (or MYSQL_USER) is required without --config")?,
                args.password.clone().unwrap_or_default(),
            );
            (database, OptimizerSettings::default())
        }
    };

    if let Some(prefix) = &cli.prefix {
        settings.table_prefix = prefix.clone();
    }
    settings.validate()?;
    Ok((database, settings))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let (database, settings) = load_config(&cli)?;
    info!("Connecting to database: {}", database.database);
    let db = MySqlDatabase::connect(&database, &settings).await?;
    let optimizer = Optimizer::new(db, settings);
    let reporter = Reporter::new(cli.format);
    let configured_risk = optimizer.settings().risk_level;

    match cli.command {
        Commands::Analyze => {
            let document = optimizer.analyze_database().await?;
            reporter.report(&document)?;
        }
        Commands::Collect => {
            let data = optimizer.collect_performance_data().await?;
            reporter.report(&data)?;
        }
        Commands::Optimize { risk } => {
            match optimizer
                .optimize_database(risk.unwrap_or(configured_risk))
                .await
            {
                Ok(result) => reporter.report(&result)?,
                Err(dbmedic::service::ServiceError::Optimize { source }) => {
                    let failure = source.to_failure();
                    if matches!(cli.format, ReportFormat::Json) {
                        println!("{}", serde_json::to_string_pretty(&failure)?);
                    }
                    anyhow::bail!(failure.error);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Backup { risk } => {
            let backup = optimizer
                .create_backup(risk.unwrap_or(configured_risk))
                .await?;
            reporter.report(&backup)?;
        }
        Commands::Restore { id } => {
            let outcome = optimizer.restore_backup(id).await?;
            reporter.report(&outcome)?;
        }
        Commands::Backups { limit } => {
            let records = optimizer.get_backup_history(limit).await?;
            reporter.report(records.as_slice())?;
        }
        Commands::Run => match optimizer.run_scheduled().await? {
            Some(summary) => reporter.report(&summary)?,
            None => info!("Nothing to do: auto_optimize is disabled"),
        },
        Commands::Schedule => {
            if !optimizer.settings().auto_optimize {
                warn!("auto_optimize is disabled; scheduled runs will do nothing");
            }
            let frequency = optimizer.settings().schedule_frequency;
            let mut ticker = tokio::time::interval(frequency.interval());
            info!("Scheduling optimization every {:?}", frequency.interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => match optimizer.run_scheduled().await {
                        Ok(Some(summary)) => reporter.report(&summary)?,
                        Ok(None) => {}
                        Err(err) => warn!("Scheduled run failed: {err}"),
                    },
                    _ = tokio::signal::ctrl_c() => {
                        info!("Stopping scheduler");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

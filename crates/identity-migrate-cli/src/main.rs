//! identity-migrate CLI - PostgreSQL identity column migration.

use clap::{Parser, Subcommand};
use identity_migrate::{
    Config, IdentityReport, MigrateError, Orchestrator, RunMode, SchemaCatalog,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "identity-migrate")]
#[command(about = "Turn migrated auto-increment columns into PostgreSQL identity columns")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to YAML schema catalog
    #[arg(long, default_value = "catalog.yaml")]
    catalog: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add identity to auto-increment columns and synchronize their sequences
    Create {
        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Re-synchronize existing identity sequences to the column maximum
    Resync {
        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show the statements a run would issue
    Plan {
        /// Plan a resync instead of a create
        #[arg(long)]
        resync: bool,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,
    },

    /// Test the target database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match &cli.command {
        Commands::Create {
            target_schema,
            workers,
        } => {
            apply_overrides(&mut config, target_schema.clone(), *workers)?;
            let catalog = load_catalog(&cli.catalog)?;
            run_identity(config, catalog, RunMode::Create, &cli).await?;
        }

        Commands::Resync {
            target_schema,
            workers,
        } => {
            apply_overrides(&mut config, target_schema.clone(), *workers)?;
            let catalog = load_catalog(&cli.catalog)?;
            run_identity(config, catalog, RunMode::Resync, &cli).await?;
        }

        Commands::Plan {
            resync,
            target_schema,
        } => {
            let mode = if *resync { RunMode::Resync } else { RunMode::Create };
            apply_overrides(&mut config, target_schema.clone(), None)?;
            let catalog = load_catalog(&cli.catalog)?;

            let orchestrator = Orchestrator::offline(config, catalog);
            let plan = orchestrator.plan(mode)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else if plan.is_empty() {
                println!("No auto-increment columns to migrate");
            } else {
                for statement in &plan {
                    println!("-- {}", statement.table);
                    println!("{}", statement.sql);
                }
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config, SchemaCatalog::default()).await?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::pool("Health check failed", "target"));
            }
        }
    }

    Ok(())
}

fn apply_overrides(
    config: &mut Config,
    target_schema: Option<String>,
    workers: Option<usize>,
) -> Result<(), MigrateError> {
    if let Some(schema) = target_schema {
        config.target.schema = schema;
    }
    if let Some(w) = workers {
        config.migration.workers = Some(w);
    }
    config.validate()
}

fn load_catalog(path: &Path) -> Result<SchemaCatalog, MigrateError> {
    let catalog = SchemaCatalog::load(path)?;
    info!("Loaded {} tables from {:?}", catalog.len(), path);
    Ok(catalog)
}

async fn run_identity(
    config: Config,
    catalog: SchemaCatalog,
    mode: RunMode,
    cli: &Cli,
) -> Result<(), MigrateError> {
    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler(cli.shutdown_timeout)?;

    let orchestrator = Orchestrator::new(config, catalog).await?;
    let report =
        run_until_shutdown(&orchestrator, mode, cancel_token, cli.shutdown_timeout).await?;

    if cli.output_json {
        println!("{}", report.to_json()?);
    } else {
        print_report(&report);
    }

    if report.is_cancelled() {
        return Err(MigrateError::Cancelled);
    }
    Ok(())
}

/// Run to completion, giving up `shutdown_timeout` seconds after cancellation.
async fn run_until_shutdown(
    orchestrator: &Orchestrator,
    mode: RunMode,
    cancel_token: CancellationToken,
    shutdown_timeout: u64,
) -> Result<IdentityReport, MigrateError> {
    let deadline = async {
        cancel_token.cancelled().await;
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
    };

    tokio::select! {
        report = orchestrator.run(mode, cancel_token.clone()) => report,
        _ = deadline => {
            warn!("Shutdown timeout of {}s exceeded", shutdown_timeout);
            Err(MigrateError::Cancelled)
        }
    }
}

fn print_report(report: &IdentityReport) {
    let status_msg = match report.mode {
        RunMode::Create => "Identity migration",
        RunMode::Resync => "Sequence resync",
    };
    println!("\n{} {}!", status_msg, report.status.replace('_', " "));
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!(
        "  Tables: {}/{} synchronized",
        report.tables_synchronized, report.tables_total
    );
    println!("  Skipped: {}", report.tables_skipped);
    let failed = report.failed_tables();
    if !failed.is_empty() {
        println!("  Failed tables: {:?}", failed);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().try_init().map_err(|e| e.to_string())
    } else {
        subscriber.try_init().map_err(|e| e.to_string())
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!(
            "\nReceived SIGINT. Shutting down gracefully (timeout: {}s)...",
            shutdown_timeout
        );
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!(
            "\nReceived SIGTERM. Shutting down gracefully (timeout: {}s)...",
            shutdown_timeout
        );
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(_shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}

//! crsync CLI - content repository synchronization.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use crsync::{Config, Repository, SqliteRepository, SyncError, SyncExecutor};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "crsync")]
#[command(about = "Synchronize content repositories with automatic schema evolution")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "crsync.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the target with the source
    Run {
        /// Override the rule selecting participating objects
        #[arg(long)]
        rule: Option<String>,

        /// Allow syncing from an empty source
        #[arg(long)]
        allow_empty: bool,

        /// Allow structural schema changes on the target
        #[arg(long)]
        allow_alter_table: bool,

        /// Keep the target's quick-column optimization as it is
        #[arg(long)]
        ignore_optimized: bool,

        /// Delete target objects not selected in the source
        #[arg(long)]
        delete: bool,

        /// Read the source inside one transaction
        #[arg(long)]
        source_transaction: bool,

        /// Write target batches without a transaction
        #[arg(long)]
        no_target_transaction: bool,

        /// Override objects per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Always stream long text and binary values
        #[arg(long)]
        use_lob_streams: bool,

        /// Stream LOBs once this many objects are candidates
        #[arg(long)]
        lob_stream_threshold: Option<usize>,

        /// Dry run: plan and report without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show schema differences and the planned schema migration
    Diff,

    /// Create the content repository layout at a URL
    Init {
        /// Repository URL, e.g. sqlite:/var/lib/cms/content.db
        #[arg(long)]
        url: String,
    },

    /// Test repository connections
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

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(SyncError::Config)?;

    // Init works without a configuration file
    if let Commands::Init { url } = &cli.command {
        let repo = SqliteRepository::connect_url(url).await?;
        repo.init_schema().await?;
        repo.close().await;
        println!("Initialized content repository at {}", url);
        return Ok(());
    }

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above
        Commands::Run {
            rule,
            allow_empty,
            allow_alter_table,
            ignore_optimized,
            delete,
            source_transaction,
            no_target_transaction,
            batch_size,
            use_lob_streams,
            lob_stream_threshold,
            dry_run,
        } => {
            // Apply overrides
            let sync = &mut config.sync;
            if rule.is_some() {
                sync.rule = rule;
            }
            sync.allow_empty |= allow_empty;
            sync.allow_alter_table |= allow_alter_table;
            sync.ignore_optimized |= ignore_optimized;
            sync.delete |= delete;
            sync.source_transaction |= source_transaction;
            sync.use_lob_streams |= use_lob_streams;
            sync.test |= dry_run;
            if no_target_transaction {
                sync.target_transaction = false;
            }
            if let Some(size) = batch_size {
                sync.batch_size = size;
            }
            if lob_stream_threshold.is_some() {
                sync.lob_stream_threshold = lob_stream_threshold;
            }

            let cancel_token = setup_signal_handler();
            let executor = SyncExecutor::from_config(&config)
                .await?
                .with_cancellation(cancel_token);

            let report = match executor.run().await {
                Ok(report) => report,
                Err(e) => {
                    if cli.output_json {
                        if let Some(partial) = e.partial_report() {
                            println!("{}", partial.to_json()?);
                        }
                    }
                    return Err(e);
                }
            };

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                let status_msg = if report.test { "Dry run completed!" } else { "Sync completed!" };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", report.run_id);
                if let Some(mode) = report.mode {
                    println!("  Mode: {:?}", mode);
                }
                for step in &report.schema_steps {
                    println!("  Schema: {}", step);
                }
                println!(
                    "  Objects: {} inserted, {} updated, {} deleted, {} unchanged",
                    report.objects_inserted,
                    report.objects_updated,
                    report.objects_deleted,
                    report.objects_unchanged
                );
                println!(
                    "  Attributes: {} written ({} values, {} streamed)",
                    report.attributes_written, report.values_written, report.lobs_streamed
                );
                println!("  {}", report.message());
            }
        }

        Commands::Diff => {
            let executor = SyncExecutor::from_config(&config).await?;
            let diff = executor.diff().await?;
            let plan = executor.plan_schema().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&diff)?);
            } else {
                let summary = diff.summary();
                println!("Schema differences:");
                println!(
                    "  Object types: {} added, {} removed, {} modified",
                    summary.object_types_added,
                    summary.object_types_removed,
                    summary.object_types_modified
                );
                println!(
                    "  Attribute types: {} added, {} removed, {} modified",
                    summary.attributes_added, summary.attributes_removed, summary.attributes_modified
                );
                match &plan {
                    Ok(plan) if plan.is_empty() => println!("\nNo schema changes needed."),
                    Ok(plan) => {
                        println!("\nPlanned schema changes:");
                        for step in &plan.steps {
                            println!("  {}", step.describe());
                        }
                    }
                    Err(e) => println!("\nSchema sync would fail: {}", e),
                }
            }

            plan?;
        }

        Commands::HealthCheck => {
            let executor = SyncExecutor::from_config(&config).await?;
            let result = executor.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source ({}): OK, {} objects, last update {}",
                    result.source, result.source_objects, result.source_last_update
                );
                println!(
                    "  Target ({}): OK, {} objects, last update {}",
                    result.target, result.target_objects, result.target_last_update
                );
            }
        }
    }

    Ok(())
}

/// `RUST_LOG` takes precedence over `--verbosity` when set.
fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    result.map_err(|e| e.to_string())
}

/// Cancel the returned token on SIGINT or SIGTERM. The run stops at the
/// next batch boundary.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current batch...", name);
                    token.cancel();
                });
            }
            Err(e) => eprintln!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}

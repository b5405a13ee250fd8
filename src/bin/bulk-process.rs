//! # Bulk Process CLI
//!
//! Drives runs on a bulk-process server: lists operations, starts a run and
//! polls it to completion with a progress bar, or resumes an interrupted run.
//! Ctrl+C aborts the run and releases its lease.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use bulk_process::config::{ConfigLoader, DriverConfig};
use bulk_process::constants::env;
use bulk_process::driver::{
    BatchDriver, BatchTransport, ConsoleProgress, DriverError, DriverOutcome, HttpTransport,
};
use bulk_process::logging;

#[derive(Parser, Debug)]
#[command(name = "bulk-process")]
#[command(about = "Drive bulk-process runs against a server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Server base URL (overrides the config file)
    #[arg(short, long, env = env::SERVER_URL)]
    server: Option<String>,

    /// API key for the `/v1` routes
    #[arg(long, env = env::API_KEY, hide_env_values = true)]
    api_key: Option<String>,

    /// Echo each processed item above the progress bar
    #[arg(short, long)]
    items: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List registered operations
    Operations,
    /// Start a run and drive it to completion
    Run {
        /// Operation name
        #[arg(short, long)]
        action: String,
    },
    /// Continue an interrupted run from its recorded offset
    Resume {
        #[arg(long, value_name = "UUID")]
        run_id: Uuid,
        /// Security token handed out when the run started
        #[arg(long)]
        security: String,
        #[arg(short, long)]
        action: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();

    let config = driver_config(&cli)?;
    let transport = Arc::new(HttpTransport::new(&config).context("failed to build HTTP client")?);

    match cli.command {
        Commands::Operations => {
            let operations = transport.list_operations().await?;
            if operations.is_empty() {
                println!("No operations registered");
            }
            for op in operations {
                let batch = op
                    .batch_size
                    .map(|size| format!(" (batch size {size})"))
                    .unwrap_or_default();
                println!("{:<28} {}{}", op.name, op.label, batch);
                if !op.description.is_empty() {
                    println!("{:<28} {}", "", op.description);
                }
            }
        }
        Commands::Run { action } => {
            let label = label_for(transport.as_ref(), &action).await;
            let observer = ConsoleProgress::new(&label, cli.items);
            let mut driver = BatchDriver::new(transport.clone(), config);
            abort_on_ctrl_c(&driver);
            let outcome = driver.run(&action, &observer).await;
            report(transport.as_ref(), outcome).await?;
        }
        Commands::Resume {
            run_id,
            security,
            action,
        } => {
            let label = label_for(transport.as_ref(), &action).await;
            let observer = ConsoleProgress::new(&label, cli.items);
            let mut driver = BatchDriver::new(transport.clone(), config);
            abort_on_ctrl_c(&driver);
            let outcome = driver.resume(run_id, &action, &security, &observer).await;
            report(transport.as_ref(), outcome).await?;
        }
    }

    Ok(())
}

fn driver_config(cli: &Cli) -> anyhow::Result<DriverConfig> {
    let mut config = ConfigLoader::load_from_env()
        .context("failed to load configuration")?
        .driver;
    if let Some(server) = &cli.server {
        config.base_url = server.clone();
    }
    if cli.api_key.is_some() {
        config.api_key = cli.api_key.clone();
    }
    Ok(config)
}

async fn label_for(transport: &dyn BatchTransport, action: &str) -> String {
    match transport.list_operations().await {
        Ok(operations) => operations
            .into_iter()
            .find(|op| op.name == action)
            .map(|op| op.label)
            .unwrap_or_else(|| action.to_string()),
        Err(e) => {
            warn!(error = %e, "Could not fetch operation labels");
            action.to_string()
        }
    }
}

fn abort_on_ctrl_c(driver: &BatchDriver) {
    let token = driver.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

async fn report(
    transport: &dyn BatchTransport,
    outcome: Result<DriverOutcome, DriverError>,
) -> anyhow::Result<()> {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(DriverError::Aborted { position }) => {
            bail!("run aborted at offset {position}");
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "Run {} finished: {} updated, {} skipped, {} failed ({} batches, {} retries)",
        outcome.run_id,
        outcome.totals.success,
        outcome.totals.skipped,
        outcome.totals.failed,
        outcome.iterations,
        outcome.retries
    );

    if let Some(url) = &outcome.summary_url {
        match transport.fetch_summary(url).await {
            Ok(summary) => println!("Summary: {} ({})", summary.label, summary.run.status),
            Err(e) => warn!(error = %e, "Could not fetch run summary"),
        }
    }
    Ok(())
}

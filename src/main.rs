//! Binary entry point for revgc.
//!
//! This binary provides the CLI interface for the revision garbage collector.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use revgc::cli;
use revgc::config::RevgcConfig;
use revgc::gc::GcMetrics;
use revgc::observability::{self, InitOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// revgc - Revision garbage collector for MVCC relationship stores.
#[derive(Parser)]
#[command(name = "revgc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "REVGC_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Datastore maintenance.
    Datastore {
        /// Datastore subcommand.
        #[command(subcommand)]
        action: DatastoreAction,
    },

    /// Run the background garbage collector until interrupted.
    Serve,
}

/// Datastore subcommands.
#[derive(Subcommand)]
enum DatastoreAction {
    /// Run one garbage collection and exit.
    Gc,

    /// Run a datastore repair, or list repairs when none is given.
    Repair {
        /// Repair operation name.
        operation: Option<String>,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let expose_metrics = matches!(cli.command, Commands::Serve);
    let _observability = match observability::init_from_config(
        &config.observability,
        InitOptions {
            verbose: cli.verbose,
            metrics_expose: expose_metrics,
        },
    ) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(
    command: Commands,
    config: RevgcConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let datastore = cli::open_datastore(&config.datastore);
    let metrics = GcMetrics::new();
    let cancel = CancellationToken::new();
    let mut stdout = std::io::stdout();

    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            signal.cancel();
        }
    });

    match command {
        Commands::Datastore {
            action: DatastoreAction::Gc,
        } => {
            let gc = config.gc.without_background();
            cli::gc::execute(datastore.as_ref(), &gc, &metrics, &cancel, &mut stdout).await?;
        },

        Commands::Datastore {
            action: DatastoreAction::Repair { operation },
        } => {
            cli::repair::execute(
                datastore.as_ref(),
                operation.as_deref(),
                &cancel,
                &mut stdout,
            )
            .await?;
        },

        Commands::Serve => {
            cli::serve::execute(
                datastore.as_ref(),
                &config.gc,
                &metrics,
                &datastore.completion(),
                &cancel,
            )
            .await?;
        },
    }

    Ok(())
}

/// Loads configuration from `path` or the default location, then applies
/// environment overrides.
fn load_config(path: Option<&Path>) -> Result<RevgcConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => RevgcConfig::load_from_file(path)?,
        None => RevgcConfig::load_default()?,
    };
    Ok(config.with_env_overrides()?)
}

//! Binary entry point for leakwatch.
//!
//! This binary provides a small CLI around the object watcher.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use leakwatch::cli::{ConfigCommand, DemoCommand};
use leakwatch::config::WatcherConfig;
use leakwatch::observability::{self, LoggingConfig, PrometheusHandle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Leakwatch - retention detection for long-lived processes.
#[derive(Parser)]
#[command(name = "leakwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "LEAKWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Watch retained and released objects and report what was retained.
    Demo {
        /// Objects kept alive past the delay.
        #[arg(short, long, default_value = "3")]
        retained: usize,

        /// Objects dropped right after being watched.
        #[arg(short = 'x', long, default_value = "5")]
        released: usize,

        /// Retained delay in milliseconds (overrides configuration).
        #[arg(short, long)]
        delay_ms: Option<u64>,

        /// Print the recorded metrics in Prometheus text format.
        #[arg(short, long)]
        metrics: bool,
    },

    /// Show the effective configuration.
    Config,
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let logging = match LoggingConfig::from_settings(Some(&config.logging), cli.verbose) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("Invalid logging configuration: {e}");
            return ExitCode::FAILURE;
        },
    };
    if let Err(e) = observability::init_logging(logging) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let metrics = match observability::install_prometheus() {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize metrics: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(cli, config, &metrics).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(
    cli: Cli,
    config: WatcherConfig,
    metrics: &PrometheusHandle,
) -> leakwatch::Result<()> {
    match cli.command {
        Commands::Demo {
            retained,
            released,
            delay_ms,
            metrics: print_metrics,
        } => {
            let report = DemoCommand::new(retained, released, delay_ms.map(Duration::from_millis))
                .run(&config)
                .await?;
            println!("{report}");
            if print_metrics {
                println!();
                print!("{}", metrics.render());
            }
        },
        Commands::Config => {
            print!("{}", ConfigCommand::new(cli.config).render(&config));
        },
    }
    Ok(())
}

/// Loads configuration from an explicit path or the default location, then
/// applies environment overrides.
fn load_config(path: Option<&Path>) -> leakwatch::Result<WatcherConfig> {
    let config = match path {
        Some(path) => WatcherConfig::load_from_file(path)?,
        None => WatcherConfig::load_default(),
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

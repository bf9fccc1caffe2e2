//! stress-herd - process-group stress harness

use std::fs::File;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use stress_herd_core::{ExitStatus, StressError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use cli::{Cli, Commands};

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;
    Ok(())
}

fn dispatch(cli: &Cli) -> Result<ExitStatus> {
    let catalog = stress_herd_stressors::catalog().context("Invalid workload catalog")?;
    match &cli.command {
        Some(Commands::List { class }) => {
            cli::list_workloads(&catalog, class.as_deref())?;
            Ok(ExitStatus::Success)
        }
        Some(Commands::Classes) => {
            cli::list_classes();
            Ok(ExitStatus::Success)
        }
        None => cli.run.run(&catalog),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("stress-herd: {e:#}");
        return ExitCode::from(ExitStatus::Failure.code() as u8);
    }

    match dispatch(&cli) {
        Ok(status) => ExitCode::from(status.code() as u8),
        Err(e) => {
            match e.downcast_ref::<StressError>() {
                Some(err) if err.is_usage() => tracing::error!("{}", err),
                _ => tracing::error!("{:#}", e),
            }
            ExitCode::from(ExitStatus::Failure.code() as u8)
        }
    }
}

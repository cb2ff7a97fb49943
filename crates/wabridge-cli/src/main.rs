mod cli;
mod commands;
mod config;
mod error;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use error::handle_error;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use wabridge_core::paths;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let guard = match init_logging(cli.verbose, cli.log_dir.clone()) {
        Ok(guard) => guard,
        Err(e) => handle_error(e),
    };

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            drop(guard);
            handle_error(e)
        }
    };

    // Flush file logs before exiting
    drop(guard);
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let bridge_config = config::load_config(cli.config.as_deref())?;
    let bridge_config = config::apply_overrides(bridge_config, &cli.overrides);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run::run(bridge_config).await,
        Commands::Health => commands::health::run(bridge_config).await,
        Commands::Config => commands::config::run(bridge_config),
    }
}

/// Log to stderr, plus a daily-rotated file when `--log-dir` is given.
fn init_logging(verbose: bool, log_dir: Option<Option<PathBuf>>) -> Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    };

    let log_dir = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            dir
        }
        None => paths::logs_dir()?,
    };

    let file_appender = tracing_appender::rolling::daily(log_dir, "wabridge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_level(true),
        )
        .init();

    Ok(Some(guard))
}

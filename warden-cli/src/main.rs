//! Warden CLI main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use warden_config::LogLevel;
use warden_execution::{run_watcher_process, run_worker_process};
use warden_logging::{init_logging_from_config, init_worker_tracing};

mod cli;
mod commands;
mod functions;

use cli::{Cli, Commands, ConfigCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle child roles first; their stdout belongs to the IPC stream
    if cli.watcher {
        init_worker_tracing(cli.log_level.as_deref())?;
        return run_watcher_process()
            .await
            .context("Watcher process failed");
    }
    if cli.worker {
        init_worker_tracing(cli.log_level.as_deref())?;
        let registry = Arc::new(functions::builtin_registry()?);
        return run_worker_process(registry)
            .await
            .context("Worker process failed");
    }

    let mut config = commands::load_config(cli.config.as_ref())?;
    let log_level = cli
        .log_level
        .as_deref()
        .map(str::parse::<LogLevel>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    init_logging_from_config(&config.logging)?;

    info!("Warden CLI starting");

    match cli.command {
        Some(Commands::Run(run)) => commands::run_command(config, &run, log_level).await,
        Some(Commands::Functions) => commands::functions_command(),
        Some(Commands::Config { config_cmd }) => match config_cmd {
            None => commands::handle_config_show(&config, "yaml"),
            Some(ConfigCommands::Show { format }) => commands::handle_config_show(&config, &format),
            Some(ConfigCommands::Validate { config_file }) => {
                commands::handle_config_validate(&config_file)
            }
            Some(ConfigCommands::Generate { output, force }) => {
                commands::handle_config_generate(&output, force)
            }
        },
        None => {
            warn!("No command specified");
            println!("No command specified. Use --help to see available commands.");
            Ok(())
        }
    }
}

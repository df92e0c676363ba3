//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Run as watcher process (internal use)
    #[arg(long, hide = true, conflicts_with = "worker")]
    pub watcher: bool,

    /// Run as worker process (internal use)
    #[arg(long, hide = true)]
    pub worker: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a built-in function in isolated worker processes
    Run(RunArgs),

    /// List the built-in functions
    Functions,

    /// Configuration management commands
    Config {
        /// Defaults to `show`
        #[command(subcommand)]
        config_cmd: Option<ConfigCommands>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Name of the function to run
    #[arg(long, value_name = "NAME")]
    pub function: String,

    /// Positional arguments as a JSON array (example: --args='[21]')
    #[arg(long, value_name = "JSON")]
    pub args: Option<String>,

    /// Named arguments as a JSON object (example: --kwargs='{"seconds":0.5}')
    #[arg(long, value_name = "JSON")]
    pub kwargs: Option<String>,

    /// Number of times to queue the task
    #[arg(long, value_name = "N", default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Maximum number of tasks running at once
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_workers: Option<u32>,

    /// Per-task wall-clock timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Per-task resident memory ceiling in GiB
    #[arg(long, value_name = "GIB")]
    pub memory_limit_gib: Option<f64>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration in use
    Show {
        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

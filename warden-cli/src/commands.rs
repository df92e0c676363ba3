//! Command handlers

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use warden_config::{ConfigLoader, LogLevel, Validatable, WardenConfig};
use warden_core::{FailureKind, Task, TaskResult};
use warden_execution::{ManagerConfig, ProcessManager};
use warden_ipc::WorkerProgram;

use crate::cli::RunArgs;
use crate::functions::builtin_registry;

/// Load configuration from `path`, or from the environment alone
pub fn load_config(path: Option<&PathBuf>) -> Result<WardenConfig> {
    ConfigLoader::new()
        .load(path)
        .context("Failed to load configuration")
}

/// Build the task described on the command line
fn build_task(function: &str, args: Option<&str>, kwargs: Option<&str>) -> Result<Task> {
    let mut builder = Task::builder(function);

    if let Some(args) = args {
        let parsed: JsonValue = serde_json::from_str(args).context("Invalid JSON in --args")?;
        let JsonValue::Array(values) = parsed else {
            bail!("--args must be a JSON array, got: {}", args);
        };
        for value in &values {
            builder = builder.arg(value)?;
        }
    }

    if let Some(kwargs) = kwargs {
        let parsed: JsonValue =
            serde_json::from_str(kwargs).context("Invalid JSON in --kwargs")?;
        let JsonValue::Object(entries) = parsed else {
            bail!("--kwargs must be a JSON object, got: {}", kwargs);
        };
        for (name, value) in &entries {
            builder = builder.kwarg(name.clone(), value)?;
        }
    }

    Ok(builder.build()?)
}

/// Tally of a finished batch
#[derive(Debug, Default, PartialEq)]
struct Summary {
    succeeded: usize,
    failed: usize,
    timed_out: usize,
    out_of_memory: usize,
}

impl Summary {
    fn record(&mut self, result: &TaskResult) {
        if result.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        match result.failure_kind() {
            Some(FailureKind::TimedOut) => self.timed_out += 1,
            Some(FailureKind::OutOfMemory) => self.out_of_memory += 1,
            _ => {}
        }
    }
}

/// The program re-launched for watchers and workers, passing on an explicit log level
fn child_program(program: WorkerProgram, log_level: Option<LogLevel>) -> WorkerProgram {
    match log_level {
        Some(level) => program.with_args(["--log-level", level.as_str()]),
        None => program,
    }
}

/// Handle `warden run`
pub async fn run_command(
    mut config: WardenConfig,
    run: &RunArgs,
    log_level: Option<LogLevel>,
) -> Result<()> {
    if let Some(max_workers) = run.max_workers {
        config.execution.max_workers = Some(max_workers as usize);
    }
    if run.timeout.is_some() {
        config.execution.worker_timeout_seconds = run.timeout;
    }
    if run.memory_limit_gib.is_some() {
        config.execution.memory_limit_gib = run.memory_limit_gib;
    }
    config
        .execution
        .validate()
        .context("Invalid execution options")?;

    let registry = Arc::new(builtin_registry()?);
    let task = build_task(&run.function, run.args.as_deref(), run.kwargs.as_deref())?;

    let program = child_program(
        WorkerProgram::current().context("Failed to locate the warden executable")?,
        log_level,
    );
    let manager_config = ManagerConfig::from_execution_config(&config.execution, program);
    let mut manager = ProcessManager::new(manager_config).with_registry(registry);

    for _ in 0..run.repeat {
        manager
            .queue_task(task.clone())
            .map_err(|e| anyhow!("{}. Run `warden functions` to list them", e))?;
    }
    info!(function = %run.function, repeat = run.repeat, "Running tasks");

    let mut summary = Summary::default();
    let results = manager.as_completed();
    futures::pin_mut!(results);
    while let Some(result) = results.next().await {
        summary.record(&result);
        let line = serde_json::to_string(&result).context("Failed to serialize task result")?;
        println!("{}", line);
    }

    eprintln!(
        "{} succeeded, {} failed ({} timed out, {} out of memory)",
        summary.succeeded, summary.failed, summary.timed_out, summary.out_of_memory
    );
    Ok(())
}

/// Handle `warden functions`
pub fn functions_command() -> Result<()> {
    let registry = builtin_registry()?;
    for name in registry.names() {
        println!("{}", name);
    }
    Ok(())
}

/// Handle `warden config show`
pub fn handle_config_show(config: &WardenConfig, format: &str) -> Result<()> {
    match format.to_lowercase().as_str() {
        "yaml" | "yml" => {
            let yaml_output = config.to_yaml().context("Failed to serialize to YAML")?;
            print!("{}", yaml_output);
        }
        "json" => {
            let json_output =
                serde_json::to_string_pretty(config).context("Failed to serialize to JSON")?;
            println!("{}", json_output);
        }
        _ => {
            return Err(anyhow!(
                "Unknown output format: {}. Valid formats: yaml, json",
                format
            ));
        }
    }
    Ok(())
}

/// Handle `warden config validate`
pub fn handle_config_validate(config_file: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow!("Configuration file not found: {:?}", config_file));
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(_config) => {
            println!("Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            Err(anyhow!("Configuration validation failed: {}", e))
        }
    }
}

/// Handle `warden config generate`
pub fn handle_config_generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }
    }

    fs::write(output, WardenConfig::generate_sample())
        .context("Failed to write configuration file")?;

    println!("Configuration generated at: {:?}", output);
    println!("Validate with: warden config validate --config-file {:?}", output);
    Ok(())
}

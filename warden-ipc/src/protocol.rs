//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;
use warden_core::{Task, TaskResult, DEFAULT_MAX_RESULT_BYTES};

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Command-line flag that switches the executable into watcher mode
pub const WATCHER_FLAG: &str = "--watcher";

/// Command-line flag that switches the executable into worker mode
pub const WORKER_FLAG: &str = "--worker";

/// The executable that child processes are launched from.
///
/// Both watchers and workers are the same program as the parent, re-executed
/// with a role flag, so they share its function registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProgram {
    pub path: PathBuf,
    /// Extra arguments placed before the role flag
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerProgram {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    /// The currently running executable
    pub fn current() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Build a command for this program in the given role, with piped stdin
    /// and stdout and inherited stderr
    pub fn command(&self, role_flag: &str) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.path);
        command
            .args(&self.args)
            .arg(role_flag)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit());
        command
    }
}

/// Resource limits and polling cadence a watcher enforces on its worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchLimits {
    /// Wall-clock budget; `None` means unlimited
    pub timeout: Option<Duration>,
    /// Resident memory budget of the worker tree in GiB; `None` means unlimited
    pub memory_limit_gib: Option<f64>,
    pub poll_interval: Duration,
    pub memory_poll_interval: Duration,
    /// How long to wait for the worker's result after it exits
    pub drain_grace: Duration,
    pub max_result_bytes: usize,
}

impl Default for WatchLimits {
    fn default() -> Self {
        Self {
            timeout: None,
            memory_limit_gib: None,
            poll_interval: Duration::from_millis(1),
            memory_poll_interval: Duration::from_millis(100),
            drain_grace: Duration::from_millis(250),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }
}

/// Messages sent downstream, to watcher and worker processes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Launch a worker for `task` and enforce `limits` on it
    WatchTask {
        correlation_id: Uuid,
        task: Task,
        limits: WatchLimits,
        program: WorkerProgram,
    },

    /// Execute a task
    ExecuteTask { correlation_id: Uuid, task: Task },
}

/// Messages sent upstream, from workers and watchers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    /// Terminal outcome of a task
    TaskResult {
        correlation_id: Uuid,
        result: TaskResult,
    },
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}

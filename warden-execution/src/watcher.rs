//! Task watcher
//!
//! A watcher runs in its own process, one per task. It launches a worker
//! process for the task, polls it for exit, wall-clock timeout and memory
//! usage, and kills it on a violation. It always reports exactly one
//! [`TaskResult`] upstream: the worker's own result, a timeout or
//! out-of-memory sentinel, or a termination sentinel if the worker vanished.

use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_core::{bound_size, FailureKind, Task, TaskFailure, TaskResult};
use warden_ipc::{
    ChildProcessTransport, CoordinatorMessage, IpcTransport, MessageEnvelope, StdioTransport,
    WatchLimits, WorkerMessage, WorkerProgram, WORKER_FLAG,
};

use crate::error::ExecutionError;
use crate::memory::MemoryProbe;
use crate::reader::{exit_parts, read_result};

/// Enforces [`WatchLimits`] on a single worker process
pub struct Watcher {
    limits: WatchLimits,
    probe: Option<MemoryProbe>,
    max_memory_used_gib: f64,
}

/// Why the watcher stopped polling
enum Outcome {
    Exited(std::process::ExitStatus),
    Killed(TaskFailure, Option<std::process::ExitStatus>),
}

impl Watcher {
    pub fn new(limits: WatchLimits) -> Self {
        let probe = limits.memory_limit_gib.map(|_| MemoryProbe::new());
        Self {
            limits,
            probe,
            max_memory_used_gib: 0.0,
        }
    }

    /// Run `task` in a worker launched from `program` and return its outcome
    pub async fn watch(
        &mut self,
        correlation_id: Uuid,
        task: Task,
        program: &WorkerProgram,
    ) -> TaskResult {
        let start_time = Utc::now();
        let started = Instant::now();

        let mut child = match program.command(WORKER_FLAG).kill_on_drop(true).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(%correlation_id, error = %e, "Failed to spawn worker process");
                let failure = TaskFailure::new(
                    FailureKind::Terminated,
                    format!("failed to launch worker process: {}", e),
                );
                let mut result = TaskResult::failure(task.clone(), failure);
                self.stamp(&mut result, task, start_time, started.elapsed(), None);
                return result;
            }
        };
        let pid = child.id();
        debug!(%correlation_id, pid, function = %task.func(), "Worker process started");

        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let mut reader_handle = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => {
                let (mut reader, mut writer) =
                    ChildProcessTransport::from_child(stdin, stdout).into_split();
                let message = MessageEnvelope::new(WorkerMessage::ExecuteTask {
                    correlation_id,
                    task: task.clone(),
                });
                if let Err(e) = writer.send(&message).await {
                    warn!(%correlation_id, error = %e, "Failed to hand task to worker");
                }
                drop(writer);

                Some(tokio::spawn(async move {
                    if let Some(result) = read_result(&mut reader, correlation_id).await {
                        let _ = result_tx.send(result);
                    }
                }))
            }
            _ => {
                warn!(%correlation_id, "Worker process has no stdio pipes");
                None
            }
        };

        let mut received: Option<TaskResult> = None;
        let outcome = self
            .poll(&mut child, pid, started, &mut result_rx, &mut received)
            .await;

        if let Some(handle) = reader_handle.as_mut() {
            if tokio::time::timeout(self.limits.drain_grace, &mut *handle)
                .await
                .is_err()
            {
                debug!(%correlation_id, "Worker stdout still open after exit, abandoning reader");
                handle.abort();
            }
        }
        while let Ok(result) = result_rx.try_recv() {
            received.get_or_insert(result);
        }

        let elapsed = started.elapsed();
        let (mut result, status) = match outcome {
            Outcome::Killed(failure, status) => {
                (TaskResult::failure(task.clone(), failure), status)
            }
            Outcome::Exited(status) => match received {
                Some(result) => (result, Some(status)),
                None => {
                    let (code, signal) = exit_parts(&status);
                    warn!(%correlation_id, ?code, ?signal, "Worker exited without a result");
                    (
                        TaskResult::failure(task.clone(), TaskFailure::terminated(code, signal)),
                        Some(status),
                    )
                }
            },
        };

        self.stamp(&mut result, task, start_time, elapsed, status);
        info!(
            %correlation_id,
            success = result.is_success(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Task finished"
        );
        result
    }

    async fn poll(
        &mut self,
        child: &mut Child,
        pid: Option<u32>,
        started: Instant,
        result_rx: &mut mpsc::UnboundedReceiver<TaskResult>,
        received: &mut Option<TaskResult>,
    ) -> Outcome {
        let mut last_memory_check = Instant::now();

        loop {
            while let Ok(result) = result_rx.try_recv() {
                received.get_or_insert(result);
            }

            match child.try_wait() {
                Ok(Some(status)) => return Outcome::Exited(status),
                Ok(None) => {}
                Err(e) => {
                    // Status cannot be queried; fall back to a blocking wait
                    warn!(pid, error = %e, "Failed to poll worker process");
                    return match child.wait().await {
                        Ok(status) => Outcome::Exited(status),
                        Err(e) => Outcome::Killed(
                            TaskFailure::new(
                                FailureKind::Terminated,
                                format!("lost track of worker process: {}", e),
                            ),
                            None,
                        ),
                    };
                }
            }

            if let Some(timeout) = self.limits.timeout {
                if started.elapsed() > timeout {
                    warn!(pid, timeout_ms = timeout.as_millis() as u64, "Worker exceeded its timeout");
                    let status = kill(child).await;
                    return Outcome::Killed(TaskFailure::timed_out(timeout), status);
                }
            }

            if let (Some(limit), Some(pid)) = (self.limits.memory_limit_gib, pid) {
                if last_memory_check.elapsed() > self.limits.memory_poll_interval {
                    last_memory_check = Instant::now();
                    let used = self
                        .probe
                        .get_or_insert_with(MemoryProbe::new)
                        .tree_rss_gib(pid);
                    self.max_memory_used_gib = self.max_memory_used_gib.max(used);
                    if used > limit {
                        warn!(pid, used_gib = used, limit_gib = limit, "Worker exceeded its memory limit");
                        let status = kill(child).await;
                        return Outcome::Killed(TaskFailure::out_of_memory(limit, used), status);
                    }
                }
            }

            if !self.limits.poll_interval.is_zero() {
                tokio::time::sleep(self.limits.poll_interval).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Overwrite the diagnostics with what the watcher observed
    fn stamp(
        &self,
        result: &mut TaskResult,
        task: Task,
        start_time: chrono::DateTime<Utc>,
        elapsed: Duration,
        status: Option<std::process::ExitStatus>,
    ) {
        let (exit_code, exit_signal) = status.as_ref().map(exit_parts).unwrap_or((None, None));
        let kind = result.failure_kind();

        result.set_task(task);
        result.start_time = Some(start_time);
        result.end_time = Some(Utc::now());
        result.elapsed_time = Some(elapsed);
        result.timed_out = kind == Some(FailureKind::TimedOut);
        result.out_of_memory = kind == Some(FailureKind::OutOfMemory);
        result.max_memory_used_gib = self.max_memory_used_gib;
        result.timeout_seconds = self.limits.timeout.map(|t| t.as_secs_f64());
        result.memory_limit_gib = self.limits.memory_limit_gib;
        result.exit_code = exit_code;
        result.exit_signal = exit_signal;
    }
}

/// Forcefully terminate the worker and collect its exit status
async fn kill(child: &mut Child) -> Option<std::process::ExitStatus> {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "Failed to kill worker process");
    }
    child.wait().await.ok()
}

/// Entry point of a watcher process.
///
/// Reads one `WatchTask` from stdin, watches it and writes the bounded result
/// to stdout. Fails, and so exits non-zero, when the result cannot be bounded
/// to the transmission budget; the manager then records the task as terminated.
pub async fn run_watcher_process() -> Result<(), ExecutionError> {
    let mut transport = StdioTransport::stdio();
    let envelope = transport.receive::<WorkerMessage>().await?;

    let (correlation_id, task, limits, program) = match envelope.message {
        WorkerMessage::WatchTask {
            correlation_id,
            task,
            limits,
            program,
        } => (correlation_id, task, limits, program),
        other => {
            return Err(ExecutionError::UnexpectedMessage(format!(
                "watcher expected a task to watch, got {:?}",
                other
            )))
        }
    };

    let max_result_bytes = limits.max_result_bytes;
    let mut result = Watcher::new(limits).watch(correlation_id, task, &program).await;

    let deleted = bound_size(&mut result, max_result_bytes)?;
    if !deleted.is_empty() {
        info!(%correlation_id, ?deleted, "Result attributes dropped to fit the size budget");
    }

    transport
        .send(&MessageEnvelope::new(CoordinatorMessage::TaskResult {
            correlation_id,
            result,
        }))
        .await?;
    Ok(())
}

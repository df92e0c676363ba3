//! Bounded process manager
//!
//! Tasks are queued first and started later. At most `max_workers` tasks run
//! at once, each inside its own watcher process, and results are handed back
//! in completion order. Every queued task yields exactly one result.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_config::ExecutionConfig;
use warden_core::{FailureKind, FunctionRegistry, Task, TaskFailure, TaskResult};
use warden_ipc::{
    ChildProcessTransport, MessageEnvelope, WatchLimits, WorkerMessage, WorkerProgram,
    WATCHER_FLAG,
};

use crate::error::ExecutionError;
use crate::reader::{exit_parts, read_result};

/// Runtime configuration of a [`ProcessManager`]
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub max_workers: usize,
    pub worker_timeout: Option<Duration>,
    pub memory_limit_gib: Option<f64>,
    /// Longest the driver waits for a completion before checking on its watchers
    pub idle_interval: Duration,
    pub poll_interval: Duration,
    pub memory_poll_interval: Duration,
    pub drain_grace: Duration,
    pub max_result_bytes: usize,
    /// Executable re-launched for the watcher and worker roles
    pub program: WorkerProgram,
}

impl ManagerConfig {
    /// Defaults with one worker per CPU
    pub fn new(program: WorkerProgram) -> Self {
        Self::from_execution_config(&ExecutionConfig::default(), program)
    }

    pub fn from_execution_config(config: &ExecutionConfig, program: WorkerProgram) -> Self {
        Self {
            max_workers: config.resolved_max_workers(),
            worker_timeout: config.worker_timeout(),
            memory_limit_gib: config.memory_limit_gib,
            idle_interval: config.idle_interval(),
            poll_interval: config.poll_interval(),
            memory_poll_interval: config.memory_poll_interval(),
            drain_grace: config.drain_grace(),
            max_result_bytes: config.max_result_bytes,
            program,
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn with_memory_limit_gib(mut self, limit: Option<f64>) -> Self {
        self.memory_limit_gib = limit;
        self
    }

    pub fn with_max_result_bytes(mut self, max_result_bytes: usize) -> Self {
        self.max_result_bytes = max_result_bytes;
        self
    }

    fn watch_limits(&self) -> WatchLimits {
        WatchLimits {
            timeout: self.worker_timeout,
            memory_limit_gib: self.memory_limit_gib,
            poll_interval: self.poll_interval,
            memory_poll_interval: self.memory_poll_interval,
            drain_grace: self.drain_grace,
            max_result_bytes: self.max_result_bytes,
        }
    }
}

/// A task waiting for a free slot
struct PendingTask {
    correlation_id: Uuid,
    task: Task,
}

/// A task whose watcher process is running
struct ActiveSlot {
    task: Task,
    pid: Option<u32>,
    start_time: DateTime<Utc>,
    started: Instant,
    handle: JoinHandle<()>,
}

/// Sent once per watcher, after the watcher process has exited
#[derive(Debug)]
struct WatcherEvent {
    correlation_id: Uuid,
    result: Option<TaskResult>,
    exit_code: Option<i32>,
    exit_signal: Option<i32>,
}

/// Runs queued tasks in watcher processes, at most `max_workers` at a time
pub struct ProcessManager {
    config: ManagerConfig,
    registry: Option<Arc<FunctionRegistry>>,
    pending: VecDeque<PendingTask>,
    active: HashMap<Uuid, ActiveSlot>,
    /// Finished results not yet handed out
    ready: VecDeque<TaskResult>,
    events_tx: mpsc::UnboundedSender<WatcherEvent>,
    events_rx: mpsc::UnboundedReceiver<WatcherEvent>,
    task_results: Vec<TaskResult>,
}

impl ProcessManager {
    pub fn new(config: ManagerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        info!(
            max_workers = config.max_workers,
            timeout_ms = config.worker_timeout.map(|t| t.as_millis() as u64),
            memory_limit_gib = config.memory_limit_gib,
            "Process manager created"
        );
        Self {
            config,
            registry: None,
            pending: VecDeque::new(),
            active: HashMap::new(),
            ready: VecDeque::new(),
            events_tx,
            events_rx,
            task_results: Vec::new(),
        }
    }

    /// Check function names against `registry` when tasks are queued
    pub fn with_registry(mut self, registry: Arc<FunctionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Queue a task. Nothing starts until results are requested.
    pub fn queue_task(&mut self, task: Task) -> Result<(), ExecutionError> {
        if let Some(registry) = &self.registry {
            if !registry.contains(task.func()) {
                return Err(ExecutionError::UnknownFunction(task.func().to_string()));
            }
        }
        let correlation_id = Uuid::new_v4();
        debug!(%correlation_id, function = %task.func(), "Task queued");
        self.pending.push_back(PendingTask {
            correlation_id,
            task,
        });
        Ok(())
    }

    /// Drive the pool until the next task completes.
    ///
    /// The freed slot is refilled before the result is returned, and the
    /// result is appended to [`task_results`](Self::task_results). Returns
    /// `None` once nothing is pending or running.
    pub async fn next_result(&mut self) -> Option<TaskResult> {
        let result = loop {
            if let Some(result) = self.ready.pop_front() {
                break result;
            }

            self.admit();
            if let Some(result) = self.ready.pop_front() {
                break result;
            }
            if self.active.is_empty() {
                return None;
            }

            match tokio::time::timeout(self.config.idle_interval, self.events_rx.recv()).await {
                Ok(Some(event)) => {
                    if let Some(result) = self.complete(event) {
                        break result;
                    }
                }
                Ok(None) => return None,
                Err(_) => self.reap_orphans(),
            }
        };

        self.admit();
        self.task_results.push(result.clone());
        Some(result)
    }

    /// Stream of results in completion order
    pub fn as_completed(&mut self) -> impl Stream<Item = TaskResult> + '_ {
        stream::unfold(self, |manager| async move {
            let result = manager.next_result().await?;
            Some((result, manager))
        })
    }

    /// Run every queued task to completion.
    ///
    /// Results come back in completion order.
    pub async fn start_tasks(&mut self) -> Vec<TaskResult> {
        let results: Vec<TaskResult> = self.as_completed().collect().await;
        info!(count = results.len(), "All tasks finished");
        results
    }

    /// Queue tasks inside `queue`, then run them all.
    ///
    /// This is the scoped form: work queued in the closure is guaranteed to
    /// have run when the returned future resolves.
    pub async fn scope<F>(config: ManagerConfig, queue: F) -> Vec<TaskResult>
    where
        F: FnOnce(&mut ProcessManager),
    {
        let mut manager = ProcessManager::new(config);
        queue(&mut manager);
        manager.start_tasks().await
    }

    pub fn task_results(&self) -> &[TaskResult] {
        &self.task_results
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Start watchers for pending tasks while slots are free
    fn admit(&mut self) {
        while self.active.len() < self.config.max_workers {
            let Some(PendingTask {
                correlation_id,
                task,
            }) = self.pending.pop_front()
            else {
                break;
            };

            let start_time = Utc::now();
            let started = Instant::now();
            let mut command = self.config.program.command(WATCHER_FLAG);
            command.kill_on_drop(true);
            let child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    warn!(%correlation_id, error = %e, "Failed to spawn watcher process");
                    let failure = TaskFailure::new(
                        FailureKind::Terminated,
                        format!("failed to launch watcher process: {}", e),
                    );
                    let result = self.synthesize(task, failure, start_time, started, None, None);
                    self.ready.push_back(result);
                    continue;
                }
            };

            let pid = child.id();
            debug!(%correlation_id, pid, function = %task.func(), "Watcher process started");

            let message = WorkerMessage::WatchTask {
                correlation_id,
                task: task.clone(),
                limits: self.config.watch_limits(),
                program: self.config.program.clone(),
            };
            let handle = tokio::spawn(supervise_watcher(
                correlation_id,
                child,
                message,
                self.events_tx.clone(),
            ));

            self.active.insert(
                correlation_id,
                ActiveSlot {
                    task,
                    pid,
                    start_time,
                    started,
                    handle,
                },
            );
        }
    }

    /// Turn a watcher event into the task's final result
    fn complete(&mut self, event: WatcherEvent) -> Option<TaskResult> {
        let Some(slot) = self.active.remove(&event.correlation_id) else {
            warn!(correlation_id = %event.correlation_id, "Event for unknown watcher");
            return None;
        };

        debug!(
            correlation_id = %event.correlation_id,
            pid = slot.pid,
            elapsed_ms = slot.started.elapsed().as_millis() as u64,
            "Watcher finished"
        );

        let result = match event.result {
            Some(result) => result,
            None => {
                warn!(
                    correlation_id = %event.correlation_id,
                    exit_code = event.exit_code,
                    exit_signal = event.exit_signal,
                    "Watcher exited without reporting a result"
                );
                self.synthesize(
                    slot.task,
                    TaskFailure::terminated(event.exit_code, event.exit_signal),
                    slot.start_time,
                    slot.started,
                    event.exit_code,
                    event.exit_signal,
                )
            }
        };
        Some(result)
    }

    /// Build a failure for a task the manager has to account for itself
    fn synthesize(
        &self,
        task: Task,
        failure: TaskFailure,
        start_time: DateTime<Utc>,
        started: Instant,
        exit_code: Option<i32>,
        exit_signal: Option<i32>,
    ) -> TaskResult {
        let mut result = TaskResult::failure(task, failure);
        result.start_time = Some(start_time);
        result.end_time = Some(Utc::now());
        result.elapsed_time = Some(started.elapsed());
        result.timeout_seconds = self.config.worker_timeout.map(|t| t.as_secs_f64());
        result.memory_limit_gib = self.config.memory_limit_gib;
        result.exit_code = exit_code;
        result.exit_signal = exit_signal;
        result
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(result) = self.complete(event) {
                self.ready.push_back(result);
            }
        }
    }

    /// Record a failure for any watcher whose supervisor ended without an event
    fn reap_orphans(&mut self) {
        let finished: Vec<Uuid> = self
            .active
            .iter()
            .filter(|(_, slot)| slot.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        // A supervisor sends before it finishes, so anything it sent is queued by now
        self.drain_events();

        for correlation_id in finished {
            if let Some(slot) = self.active.remove(&correlation_id) {
                warn!(%correlation_id, pid = slot.pid, "Watcher supervisor ended without an event");
                let result = self.synthesize(
                    slot.task,
                    TaskFailure::terminated(None, None),
                    slot.start_time,
                    slot.started,
                    None,
                    None,
                );
                self.ready.push_back(result);
            }
        }
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        if !self.pending.is_empty() || !self.active.is_empty() {
            warn!(
                pending = self.pending.len(),
                active = self.active.len(),
                "Process manager dropped with unfinished tasks"
            );
        }
        for slot in self.active.values() {
            slot.handle.abort();
        }
    }
}

/// Hand the task to a watcher and wait for it to exit.
///
/// Sends exactly one [`WatcherEvent`], after the watcher process is gone.
async fn supervise_watcher(
    correlation_id: Uuid,
    mut child: Child,
    message: WorkerMessage,
    events_tx: mpsc::UnboundedSender<WatcherEvent>,
) {
    let mut result = None;

    if let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) {
        let (mut reader, mut writer) = ChildProcessTransport::from_child(stdin, stdout).into_split();
        match writer.send(&MessageEnvelope::new(message)).await {
            Ok(()) => {
                drop(writer);
                result = read_result(&mut reader, correlation_id).await;
            }
            Err(e) => warn!(%correlation_id, error = %e, "Failed to hand task to watcher"),
        }
    }

    let (exit_code, exit_signal) = match child.wait().await {
        Ok(status) => exit_parts(&status),
        Err(e) => {
            warn!(%correlation_id, error = %e, "Failed to wait for watcher process");
            (None, None)
        }
    };

    let _ = events_tx.send(WatcherEvent {
        correlation_id,
        result,
        exit_code,
        exit_signal,
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::Value as JsonValue;
    use warden_core::DEFAULT_MAX_RESULT_BYTES;

    fn shell(script: &str) -> WorkerProgram {
        WorkerProgram::new("/bin/sh").with_args(["-c", script])
    }

    fn task(n: i64) -> Task {
        Task::builder("double").arg(&n).unwrap().build().unwrap()
    }

    #[tokio::test]
    async fn test_nothing_queued() {
        let mut manager = ProcessManager::new(ManagerConfig::new(shell("exit 0")));
        assert!(manager.next_result().await.is_none());
        assert!(manager.start_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_starts_nothing() {
        let mut manager = ProcessManager::new(ManagerConfig::new(shell("exit 0")).with_max_workers(2));
        for n in 0..5 {
            manager.queue_task(task(n)).unwrap();
        }
        assert_eq!(manager.pending_count(), 5);
        assert_eq!(manager.active_count(), 0);
        manager.start_tasks().await;
    }

    #[tokio::test]
    async fn test_silent_watchers_become_terminated_results() {
        let config = ManagerConfig::new(shell("exit 7")).with_max_workers(2);
        let mut manager = ProcessManager::new(config);
        for n in 0..5 {
            manager.queue_task(task(n)).unwrap();
        }

        let results = manager.start_tasks().await;

        assert_eq!(results.len(), 5);
        for result in &results {
            assert_eq!(result.failure_kind(), Some(FailureKind::Terminated));
            assert_eq!(result.exit_code, Some(7));
            let start = result.start_time.unwrap();
            assert!(result.end_time.unwrap() >= start);
            assert!(result.elapsed_time.is_some());
        }
        let mut seen: Vec<i64> = results
            .iter()
            .map(|r| r.task().unwrap().task_args().arg::<i64>(0).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(manager.task_results().len(), 5);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_active_never_exceeds_max_workers() {
        let config = ManagerConfig::new(shell("sleep 0.3")).with_max_workers(3);
        let mut manager = ProcessManager::new(config);
        for n in 0..8 {
            manager.queue_task(task(n)).unwrap();
        }

        // Give up waiting while every slot is still busy
        let waited =
            tokio::time::timeout(Duration::from_millis(100), manager.next_result()).await;
        assert!(waited.is_err());
        assert_eq!(manager.active_count(), 3);
        assert_eq!(manager.pending_count(), 5);

        let mut count = 0;
        while let Some(_result) = manager.next_result().await {
            count += 1;
            assert!(manager.active_count() <= manager.max_workers());
            if manager.pending_count() > 0 {
                assert_eq!(manager.active_count(), manager.max_workers());
            }
        }
        assert_eq!(count, 8);
    }

    #[tokio::test]
    async fn test_freed_slot_is_refilled() {
        let config = ManagerConfig::new(shell("sleep 0.2")).with_max_workers(1);
        let mut manager = ProcessManager::new(config);
        manager.queue_task(task(1)).unwrap();
        manager.queue_task(task(2)).unwrap();

        assert!(manager.next_result().await.is_some());
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.active_count(), 1);

        assert!(manager.next_result().await.is_some());
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unlaunchable_watcher_is_terminated() {
        let config = ManagerConfig::new(WorkerProgram::new("/nonexistent/warden"));
        let mut manager = ProcessManager::new(config);
        manager.queue_task(task(1)).unwrap();

        let result = manager.next_result().await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Terminated));
        assert!(result.exception().unwrap().message.contains("failed to launch"));
        assert!(result.start_time.is_some());
        assert!(result.elapsed_time.is_some());
        assert!(manager.next_result().await.is_none());
    }

    #[tokio::test]
    async fn test_registry_rejects_unknown_functions() {
        let registry = FunctionRegistry::new()
            .with("double", |args: warden_core::TaskArgs<'_>| -> anyhow::Result<JsonValue> {
                let x: i64 = args.arg(0)?;
                Ok(serde_json::json!(x * 2))
            })
            .unwrap();
        let mut manager = ProcessManager::new(ManagerConfig::new(shell("exit 0")))
            .with_registry(Arc::new(registry));

        assert!(manager.queue_task(task(1)).is_ok());
        let unknown = Task::builder("triple").build().unwrap();
        assert!(matches!(
            manager.queue_task(unknown),
            Err(ExecutionError::UnknownFunction(name)) if name == "triple"
        ));
        assert_eq!(manager.pending_count(), 1);
        manager.start_tasks().await;
    }

    #[tokio::test]
    async fn test_as_completed_stream() {
        let mut manager = ProcessManager::new(ManagerConfig::new(shell("exit 0")).with_max_workers(2));
        for n in 0..3 {
            manager.queue_task(task(n)).unwrap();
        }

        let results: Vec<TaskResult> = manager.as_completed().collect().await;
        assert_eq!(results.len(), 3);
        assert_eq!(manager.task_results(), results.as_slice());
    }

    #[tokio::test]
    async fn test_scope_runs_everything() {
        let results = ProcessManager::scope(ManagerConfig::new(shell("exit 0")), |manager| {
            manager.queue_task(task(1)).unwrap();
            manager.queue_task(task(2)).unwrap();
        })
        .await;
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_config_from_execution_config() {
        let execution = ExecutionConfig {
            max_workers: Some(4),
            worker_timeout_seconds: Some(1.5),
            memory_limit_gib: Some(0.5),
            ..Default::default()
        };
        let config = ManagerConfig::from_execution_config(&execution, shell("exit 0"));

        assert_eq!(config.max_workers, 4);
        assert_eq!(config.worker_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.memory_limit_gib, Some(0.5));
        assert_eq!(config.max_result_bytes, DEFAULT_MAX_RESULT_BYTES);

        let limits = config.watch_limits();
        assert_eq!(limits.timeout, config.worker_timeout);
        assert_eq!(limits.memory_poll_interval, Duration::from_millis(100));
    }
}

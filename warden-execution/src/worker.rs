//! Worker process: executes exactly one task

use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warden_core::{execute, FunctionRegistry, Task, TaskFailure, TaskResult};
use warden_ipc::{
    CoordinatorMessage, IpcTransport, MessageEnvelope, StdioTransport, WorkerMessage,
};

use crate::error::ExecutionError;

/// Run `task` on the blocking pool so a long computation never stalls the runtime
pub async fn execute_blocking(task: Task, registry: Arc<FunctionRegistry>) -> TaskResult {
    let fallback = task.clone();
    match tokio::task::spawn_blocking(move || execute(&task, &registry)).await {
        Ok(result) => result,
        Err(e) => TaskResult::failure(fallback, TaskFailure::panicked(e.to_string())),
    }
}

/// Flush whatever a work function printed and finish its line.
///
/// Stdout doubles as the result channel, so the envelope must start on a
/// fresh line.
fn end_partial_line<W: Write>(out: &mut W) -> std::io::Result<()> {
    out.write_all(b"\n")?;
    out.flush()
}

/// Entry point of a worker process.
///
/// Reads one `ExecuteTask` from stdin, runs it against `registry` and writes
/// the result to stdout. A crash in here is noticed by the watcher as a
/// worker that exited without a result.
pub async fn run_worker_process(registry: Arc<FunctionRegistry>) -> Result<(), ExecutionError> {
    info!(pid = std::process::id(), "Worker process started");

    let mut transport = StdioTransport::stdio();
    let envelope = transport.receive::<WorkerMessage>().await?;

    let (correlation_id, task) = match envelope.message {
        WorkerMessage::ExecuteTask {
            correlation_id,
            task,
        } => (correlation_id, task),
        other => {
            return Err(ExecutionError::UnexpectedMessage(format!(
                "worker expected a task to execute, got {:?}",
                other
            )))
        }
    };

    debug!(%correlation_id, function = %task.func(), "Executing task");
    let result = execute_blocking(task, registry).await;
    debug!(%correlation_id, success = result.is_success(), "Task executed");

    if let Err(e) = end_partial_line(&mut std::io::stdout().lock()) {
        warn!(%correlation_id, error = %e, "Failed to flush worker stdout");
    }

    transport
        .send(&MessageEnvelope::new(CoordinatorMessage::TaskResult {
            correlation_id,
            result,
        }))
        .await?;
    Ok(())
}

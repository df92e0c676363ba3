//! Error types for task execution

use thiserror::Error;
use warden_core::SizeGuardError;
use warden_ipc::IpcError;

/// Task execution errors.
///
/// These describe failures of the engine itself. A task that fails is not an
/// error at this level; it produces a failed `TaskResult`.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No work function registered as '{0}'")]
    UnknownFunction(String),

    #[error("IPC error: {0}")]
    IpcError(#[from] IpcError),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Result could not be bounded for transmission: {0}")]
    SizeGuard(#[from] SizeGuardError),
}

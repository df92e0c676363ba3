//! Inter-process communication for Warden
//!
//! This crate provides the message protocol and line-delimited JSON transport
//! used between the process manager, its watcher processes and their workers.

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    CoordinatorMessage, MessageEnvelope, WatchLimits, WorkerMessage, WorkerProgram,
    IPC_PROTOCOL_VERSION, WATCHER_FLAG, WORKER_FLAG,
};
pub use transport::{
    ChildProcessTransport, IpcTransport, LineTransport, MessageReader, MessageWriter,
    StdioTransport,
};

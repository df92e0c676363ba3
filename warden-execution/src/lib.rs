//! Process-based task execution for Warden
//!
//! Three roles cooperate, each in its own OS process:
//!
//! - the [`ProcessManager`] queues tasks and keeps at most `max_workers`
//!   watcher processes alive,
//! - a [`Watcher`] launches one worker, enforces timeout and memory limits on
//!   it and reports exactly one result,
//! - a worker runs one task from the function registry.
//!
//! Watchers and workers are the parent program re-executed with a role flag;
//! see [`run_watcher_process`] and [`run_worker_process`].

pub mod error;
pub mod manager;
pub mod memory;
mod reader;
pub mod watcher;
pub mod worker;

pub use error::ExecutionError;
pub use manager::{ManagerConfig, ProcessManager};
pub use memory::{bytes_to_gib, MemoryProbe};
pub use watcher::{run_watcher_process, Watcher};
pub use worker::{execute_blocking, run_worker_process};

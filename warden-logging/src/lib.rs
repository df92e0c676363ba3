//! Logging initialisation for Warden
//!
//! Every process writes its logs to stderr. For watcher and worker processes
//! this is mandatory, because their stdout carries the IPC stream.

pub mod init;

pub use init::{init_logging_from_config, init_simple_tracing, init_worker_tracing};

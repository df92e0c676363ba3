//! Core domain model for Warden
//!
//! This crate defines what travels between the process manager, its watchers
//! and their workers:
//! - [`Task`]: an immutable unit of work (function name plus JSON arguments)
//! - [`TaskResult`]: the single terminal outcome of a task, with diagnostics
//! - [`FunctionRegistry`]: name-addressed work functions, identical in every process
//! - [`bound_size`]: the transmission-size guard applied before a result is sent upstream
//! - [`execute`]: the failure boundary that turns any outcome into a `TaskResult`

pub mod error;
pub mod execute;
pub mod registry;
pub mod result;
pub mod size_guard;
pub mod task;

// Re-export main types
pub use error::{CoreError, RegistryError, SizeGuardError};
pub use execute::execute;
pub use registry::{FunctionRegistry, WorkFunction};
pub use result::{Deleted, FailureKind, Field, TaskFailure, TaskResult};
pub use size_guard::{bound_size, estimate_size, SizeBounded, SizeEstimator, DEFAULT_MAX_RESULT_BYTES};
pub use task::{FunctionName, Task, TaskArgs, TaskBuilder};

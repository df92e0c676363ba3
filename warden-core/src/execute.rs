//! Task execution failure boundary

use chrono::Utc;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::registry::FunctionRegistry;
use crate::result::{TaskFailure, TaskResult};
use crate::task::Task;

/// Run `task` against `registry` and capture its outcome.
///
/// Never fails and never unwinds: a returned value becomes a success, an error
/// or a panic inside the work function becomes a failure carrying the message,
/// and an unregistered name becomes an `UnknownFunction` failure. Start, end
/// and elapsed time are stamped on every result.
pub fn execute(task: &Task, registry: &FunctionRegistry) -> TaskResult {
    let start_time = Utc::now();
    let started = Instant::now();

    let mut result = match registry.get(task.func()) {
        None => {
            tracing::warn!(function = %task.func(), "No work function registered");
            TaskResult::failure(task.clone(), TaskFailure::unknown_function(task.func().as_str()))
        }
        Some(function) => {
            match catch_unwind(AssertUnwindSafe(|| function.call(task.task_args()))) {
                Ok(Ok(value)) => TaskResult::success(task.clone(), value),
                Ok(Err(e)) => {
                    tracing::debug!(function = %task.func(), error = %e, "Work function returned an error");
                    TaskResult::failure(task.clone(), TaskFailure::raised(format!("{:#}", e)))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::debug!(function = %task.func(), %message, "Work function panicked");
                    TaskResult::failure(task.clone(), TaskFailure::panicked(message))
                }
            }
        }
    };

    result.start_time = Some(start_time);
    result.end_time = Some(Utc::now());
    result.elapsed_time = Some(started.elapsed());
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "work function panicked".to_string()
    }
}

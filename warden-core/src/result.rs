//! Task results and failure taxonomy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;

use crate::task::Task;

/// Placeholder for an attribute dropped by the size guard.
///
/// Its presence means the payload was too large to transmit. It is never a
/// legitimate domain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Deleted;

/// An attribute that is either transmitted as-is or replaced by [`Deleted`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field<T> {
    Present(T),
    Deleted(Deleted),
}

impl<T> Field<T> {
    pub fn as_present(&self) -> Option<&T> {
        match self {
            Field::Present(value) => Some(value),
            Field::Deleted(_) => None,
        }
    }

    pub fn into_present(self) -> Option<T> {
        match self {
            Field::Present(value) => Some(value),
            Field::Deleted(_) => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Field::Deleted(_))
    }
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Field::Present(value)
    }
}

/// Classification of a failed task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The work function returned an error
    Raised,
    /// The work function panicked
    Panicked,
    /// No work function is registered under the task's name
    UnknownFunction,
    /// Wall-clock budget exceeded; the worker was killed
    TimedOut,
    /// Resident memory budget exceeded; the worker was killed
    OutOfMemory,
    /// The worker disappeared without producing a result
    Terminated,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Raised => "raised",
            FailureKind::Panicked => "panicked",
            FailureKind::UnknownFunction => "unknown_function",
            FailureKind::TimedOut => "timed_out",
            FailureKind::OutOfMemory => "out_of_memory",
            FailureKind::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// The captured error of a failed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn raised(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Raised, message)
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Panicked, message)
    }

    pub fn unknown_function(name: &str) -> Self {
        Self::new(
            FailureKind::UnknownFunction,
            format!("no work function registered as '{}'", name),
        )
    }

    /// Timeout sentinel
    pub fn timed_out(timeout: Duration) -> Self {
        Self::new(
            FailureKind::TimedOut,
            format!("task exceeded its timeout of {:.3}s", timeout.as_secs_f64()),
        )
        .with_details(serde_json::json!({ "timeout_seconds": timeout.as_secs_f64() }))
    }

    /// Memory-violation sentinel
    pub fn out_of_memory(limit_gib: f64, observed_gib: f64) -> Self {
        Self::new(
            FailureKind::OutOfMemory,
            format!(
                "task used {:.3} GiB, exceeding its memory limit of {:.3} GiB",
                observed_gib, limit_gib
            ),
        )
        .with_details(serde_json::json!({
            "memory_limit_gib": limit_gib,
            "observed_gib": observed_gib,
        }))
    }

    /// Generic termination sentinel for a worker that vanished without a result
    pub fn terminated(exit_code: Option<i32>, exit_signal: Option<i32>) -> Self {
        let message = match (exit_code, exit_signal) {
            (_, Some(signal)) => format!("worker terminated by signal {} without a result", signal),
            (Some(code), None) => format!("worker exited with status {} without a result", code),
            (None, None) => "worker terminated without a result".to_string(),
        };
        Self::new(FailureKind::Terminated, message).with_details(serde_json::json!({
            "exit_code": exit_code,
            "exit_signal": exit_signal,
        }))
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskFailure {}

/// The single terminal outcome of a task.
///
/// `success == true` implies no exception; a timeout or memory violation
/// implies `success == false`. The constructors are the only way to set the
/// outcome, so both hold by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    task: Field<Task>,
    success: bool,
    result: Field<Option<JsonValue>>,
    exception: Field<Option<TaskFailure>>,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, with = "serde_secs_option")]
    pub elapsed_time: Option<Duration>,
    pub timed_out: bool,
    pub out_of_memory: bool,
    pub max_memory_used_gib: f64,
    pub timeout_seconds: Option<f64>,
    pub memory_limit_gib: Option<f64>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
}

impl TaskResult {
    fn with_outcome(
        task: Task,
        success: bool,
        result: Option<JsonValue>,
        exception: Option<TaskFailure>,
    ) -> Self {
        Self {
            task: Field::Present(task),
            success,
            result: Field::Present(result),
            exception: Field::Present(exception),
            start_time: None,
            end_time: None,
            elapsed_time: None,
            timed_out: false,
            out_of_memory: false,
            max_memory_used_gib: 0.0,
            timeout_seconds: None,
            memory_limit_gib: None,
            exit_code: None,
            exit_signal: None,
        }
    }

    /// A task that returned `value`
    pub fn success(task: Task, value: JsonValue) -> Self {
        Self::with_outcome(task, true, Some(value), None)
    }

    /// A task that failed with `failure`
    pub fn failure(task: Task, failure: TaskFailure) -> Self {
        let timed_out = failure.kind == FailureKind::TimedOut;
        let out_of_memory = failure.kind == FailureKind::OutOfMemory;
        let mut result = Self::with_outcome(task, false, None, Some(failure));
        result.timed_out = timed_out;
        result.out_of_memory = out_of_memory;
        result
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The task this result belongs to, unless the size guard dropped it
    pub fn task(&self) -> Option<&Task> {
        self.task.as_present()
    }

    /// The returned value. `None` both when no value was produced and when it was deleted.
    pub fn result(&self) -> Option<&JsonValue> {
        static VOID: JsonValue = JsonValue::Null;
        match self.result.as_present() {
            Some(Some(value)) => Some(value),
            // A null return value reads back as `None` off the wire
            Some(None) if self.success => Some(&VOID),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&TaskFailure> {
        self.exception.as_present().and_then(Option::as_ref)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.exception().map(|failure| failure.kind)
    }

    pub fn task_field(&self) -> &Field<Task> {
        &self.task
    }

    pub fn result_field(&self) -> &Field<Option<JsonValue>> {
        &self.result
    }

    pub fn exception_field(&self) -> &Field<Option<TaskFailure>> {
        &self.exception
    }

    /// Re-attach the canonical task, replacing whatever the worker sent back
    pub fn set_task(&mut self, task: Task) {
        self.task = Field::Present(task);
    }

    pub(crate) fn task_field_mut(&mut self) -> &mut Field<Task> {
        &mut self.task
    }

    pub(crate) fn result_field_mut(&mut self) -> &mut Field<Option<JsonValue>> {
        &mut self.result
    }

    pub(crate) fn exception_field_mut(&mut self) -> &mut Field<Option<TaskFailure>> {
        &mut self.exception
    }
}

/// Serde helper for optional durations as fractional seconds
mod serde_secs_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds: Option<f64> = Option::deserialize(deserializer)?;
        seconds
            .map(|s| Duration::try_from_secs_f64(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        Task::builder("double").arg(&5).unwrap().build().unwrap()
    }

    #[test]
    fn test_success_has_no_exception() {
        let result = TaskResult::success(task(), json!(10));

        assert!(result.is_success());
        assert_eq!(result.result(), Some(&json!(10)));
        assert!(result.exception().is_none());
        assert!(!result.timed_out);
        assert!(!result.out_of_memory);
        assert_eq!(result.task(), Some(&task()));
    }

    #[test]
    fn test_void_success_is_distinct_from_no_result() {
        let void = TaskResult::success(task(), JsonValue::Null);
        let failed = TaskResult::failure(task(), TaskFailure::raised("boom"));

        assert_eq!(void.result(), Some(&JsonValue::Null));
        assert_eq!(failed.result(), None);
    }

    #[test]
    fn test_failure_preserves_message() {
        let result = TaskResult::failure(task(), TaskFailure::raised("boom"));

        assert!(!result.is_success());
        assert_eq!(result.exception().unwrap().message, "boom");
        assert_eq!(result.failure_kind(), Some(FailureKind::Raised));
        assert!(!result.timed_out);
        assert!(!result.out_of_memory);
    }

    #[test]
    fn test_sentinels_set_flags() {
        let timeout = TaskResult::failure(task(), TaskFailure::timed_out(Duration::from_millis(500)));
        assert!(timeout.timed_out);
        assert!(!timeout.is_success());

        let oom = TaskResult::failure(task(), TaskFailure::out_of_memory(1.0, 1.5));
        assert!(oom.out_of_memory);
        assert!(!oom.is_success());
    }

    #[test]
    fn test_terminated_message_mentions_signal() {
        let failure = TaskFailure::terminated(None, Some(6));
        assert_eq!(failure.kind, FailureKind::Terminated);
        assert!(failure.message.contains("signal 6"));

        let failure = TaskFailure::terminated(Some(101), None);
        assert!(failure.message.contains("status 101"));
    }

    #[test]
    fn test_deleted_field_serialization() {
        let mut result = TaskResult::success(task(), json!("payload"));
        *result.result_field_mut() = Field::Deleted(Deleted);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["result"], json!({"deleted": null}));
        assert_eq!(value["task"]["present"]["func"], json!("double"));

        let back: TaskResult = serde_json::from_value(value).unwrap();
        assert!(back.result_field().is_deleted());
        assert_eq!(back.result(), None);
    }

    #[test]
    fn test_void_success_survives_the_wire() {
        let void = TaskResult::success(task(), JsonValue::Null);
        let line = serde_json::to_string(&void).unwrap();
        let back: TaskResult = serde_json::from_str(&line).unwrap();

        assert!(back.is_success());
        assert_eq!(back.result(), Some(&JsonValue::Null));
    }

    #[test]
    fn test_elapsed_time_serializes_as_seconds() {
        let mut result = TaskResult::success(task(), json!(1));
        result.elapsed_time = Some(Duration::from_millis(1500));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["elapsed_time"], json!(1.5));

        let back: TaskResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.elapsed_time, Some(Duration::from_millis(1500)));
    }
}

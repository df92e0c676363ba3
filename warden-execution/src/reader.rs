//! Helpers shared by the manager and the watcher for talking to a child

use std::process::ExitStatus;
use tokio::io::AsyncRead;
use tracing::{debug, warn};
use uuid::Uuid;
use warden_core::TaskResult;
use warden_ipc::{CoordinatorMessage, IpcError, MessageReader};

/// Read from a child's stdout until the result for `correlation_id` arrives.
///
/// Returns `None` if the stream ends first. Lines that are not protocol
/// messages (a work function printing to stdout, say) are logged and skipped.
pub(crate) async fn read_result<R>(
    reader: &mut MessageReader<R>,
    correlation_id: Uuid,
) -> Option<TaskResult>
where
    R: AsyncRead + Unpin + Send,
{
    loop {
        match reader.receive::<CoordinatorMessage>().await {
            Ok(envelope) => {
                let CoordinatorMessage::TaskResult {
                    correlation_id: received,
                    result,
                } = envelope.message;
                if received == correlation_id {
                    return Some(result);
                }
                warn!(%correlation_id, %received, "Discarding result for another task");
            }
            Err(IpcError::ConnectionClosed) => {
                debug!(%correlation_id, "Child stdout closed");
                return None;
            }
            Err(e) if !e.is_fatal() => {
                warn!(%correlation_id, error = %e, "Skipping unreadable line from child");
            }
            Err(e) => {
                warn!(%correlation_id, error = %e, "Stopped reading from child");
                return None;
            }
        }
    }
}

/// Split an exit status into `(exit_code, exit_signal)`
pub(crate) fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::Task;
    use warden_ipc::MessageEnvelope;

    fn line(correlation_id: Uuid, value: i64) -> String {
        let task = Task::builder("double").arg(&value).unwrap().build().unwrap();
        let envelope = MessageEnvelope::new(CoordinatorMessage::TaskResult {
            correlation_id,
            result: TaskResult::success(task, json!(value * 2)),
        });
        serde_json::to_string(&envelope).unwrap()
    }

    #[tokio::test]
    async fn test_skips_noise_and_other_tasks() {
        let wanted = Uuid::new_v4();
        let input = format!(
            "printed by the work function\n{}\n{}\n",
            line(Uuid::new_v4(), 1),
            line(wanted, 2)
        );

        let mut reader = MessageReader::new(input.as_bytes());
        let result = read_result(&mut reader, wanted).await.unwrap();
        assert_eq!(result.result(), Some(&json!(4)));
    }

    #[tokio::test]
    async fn test_result_after_partial_line() {
        let wanted = Uuid::new_v4();
        let input = format!("progress\n{}\n", line(wanted, 5));

        let mut reader = MessageReader::new(input.as_bytes());
        let result = read_result(&mut reader, wanted).await.unwrap();
        assert_eq!(result.result(), Some(&json!(10)));
    }

    #[tokio::test]
    async fn test_end_of_stream_without_result() {
        let mut reader = MessageReader::new(&b"noise only\n"[..]);
        assert!(read_result(&mut reader, Uuid::new_v4()).await.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_parts() {
        let status = std::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .status()
            .unwrap();
        assert_eq!(exit_parts(&status), (Some(3), None));

        let status = std::process::Command::new("sh")
            .args(["-c", "kill -9 $$"])
            .status()
            .unwrap();
        assert_eq!(exit_parts(&status), (None, Some(9)));
    }
}

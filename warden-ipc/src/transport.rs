//! IPC transport implementations
//!
//! Every message is one JSON-encoded [`MessageEnvelope`] followed by a newline.
//! The reading and writing halves are separate types so a process can hand its
//! reader to a background task while it keeps writing.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, trace, warn};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;
}

/// Reading half: decodes one envelope per line
pub struct MessageReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            line: Vec::new(),
        }
    }

    /// Receive the next message. Blank lines are skipped.
    ///
    /// A line that is not a valid envelope (including one that is not UTF-8)
    /// yields a non-fatal [`IpcError::DeserializationError`].
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<MessageEnvelope<T>, IpcError> {
        loop {
            self.line.clear();
            let read = self.reader.read_until(b'\n', &mut self.line).await?;
            if read == 0 {
                return Err(IpcError::ConnectionClosed);
            }

            let line = self.line.trim_ascii();
            if line.is_empty() {
                trace!("Skipping blank line");
                continue;
            }

            let envelope: MessageEnvelope<T> = serde_json::from_slice(line).map_err(|e| {
                debug!(bytes = line.len(), error = %e, "Line is not a protocol message");
                IpcError::DeserializationError(e.to_string())
            })?;

            if envelope.protocol_version != IPC_PROTOCOL_VERSION {
                warn!(
                    expected = IPC_PROTOCOL_VERSION,
                    actual = envelope.protocol_version,
                    "Protocol version mismatch"
                );
                return Err(IpcError::ProtocolVersionMismatch {
                    expected: IPC_PROTOCOL_VERSION,
                    actual: envelope.protocol_version,
                });
            }

            return Ok(envelope);
        }
    }
}

/// Writing half: encodes one envelope per line and flushes it
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn send<T: Serialize>(&mut self, message: &MessageEnvelope<T>) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| IpcError::SerializationError(e.to_string()))?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut the writer down, signalling end of input to the other side
    pub async fn shutdown(&mut self) -> Result<(), IpcError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Bidirectional line transport over any reader/writer pair
pub struct LineTransport<R, W> {
    reader: MessageReader<R>,
    writer: MessageWriter<W>,
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: MessageReader::new(reader),
            writer: MessageWriter::new(writer),
        }
    }

    /// Split into independently owned halves
    pub fn into_split(self) -> (MessageReader<R>, MessageWriter<W>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl<R, W> IpcTransport for LineTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        self.writer.send(message).await
    }

    async fn receive<T: DeserializeOwned + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        self.reader.receive().await
    }
}

/// Stdin/Stdout IPC transport for process communication
pub type StdioTransport = LineTransport<tokio::io::Stdin, tokio::io::Stdout>;

impl StdioTransport {
    /// Transport over this process's own stdin and stdout
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

/// Child process transport for parent-child communication
pub type ChildProcessTransport =
    LineTransport<tokio::process::ChildStdout, tokio::process::ChildStdin>;

impl ChildProcessTransport {
    pub fn from_child(
        stdin: tokio::process::ChildStdin,
        stdout: tokio::process::ChildStdout,
    ) -> Self {
        Self::new(stdout, stdin)
    }
}

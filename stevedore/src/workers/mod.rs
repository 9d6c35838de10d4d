//! Worker-side scaffolding.
//!
//! A protocol worker is a separate executable that reads [`Command`]
//! frames from stdin and writes [`WorkerMessage`] frames to stdout; this
//! module is the engine's half of that contract packaged for worker
//! authors. Implement [`ProtocolWorker`] and hand it to [`serve`] in the
//! worker's `main`.
//!
//! Workers must keep stdout for frames only; anything human-readable
//! belongs on stderr.

mod file;

pub use file::FileWorker;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{self, Command, DirEntry, WireError, WorkerMessage};

/// Framed stdin/stdout (or arbitrary stream) of a worker process.
pub struct WorkerIo {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    rx: BytesMut,
}

impl WorkerIo {
    /// The production wiring: frames over the process's stdin/stdout.
    pub fn from_stdio() -> Self {
        Self {
            reader: Box::new(tokio::io::stdin()),
            writer: Box::new(tokio::io::stdout()),
            rx: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Frames over an arbitrary duplex stream; pairs with
    /// `tokio::io::duplex` for in-process worker tests.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            rx: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Reads the next command from the engine.
    pub async fn next_command(&mut self) -> Result<Command, WireError> {
        loop {
            if let Some(command) = protocol::decode::<Command>(&mut self.rx)? {
                return Ok(command);
            }
            match self.reader.read_buf(&mut self.rx).await {
                Ok(0) => return Err(WireError::Closed),
                Ok(_) => {}
                Err(e) => return Err(WireError::Io(e)),
            }
        }
    }

    /// Writes one frame to the engine.
    pub async fn send(&mut self, message: &WorkerMessage) -> Result<(), WireError> {
        let frame = protocol::encode(message)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn total_size(&mut self, bytes: u64) -> Result<(), WireError> {
        self.send(&WorkerMessage::TotalSize(bytes)).await
    }

    pub async fn processed_size(&mut self, bytes: u64) -> Result<(), WireError> {
        self.send(&WorkerMessage::ProcessedSize(bytes)).await
    }

    pub async fn total_files(&mut self, files: u64) -> Result<(), WireError> {
        self.send(&WorkerMessage::TotalFiles(files)).await
    }

    pub async fn processed_files(&mut self, files: u64) -> Result<(), WireError> {
        self.send(&WorkerMessage::ProcessedFiles(files)).await
    }

    pub async fn speed(&mut self, bytes_per_second: u64) -> Result<(), WireError> {
        self.send(&WorkerMessage::Speed(bytes_per_second)).await
    }

    pub async fn data(&mut self, chunk: Vec<u8>) -> Result<(), WireError> {
        self.send(&WorkerMessage::Data(chunk)).await
    }

    pub async fn list_entry(&mut self, entry: DirEntry) -> Result<(), WireError> {
        self.send(&WorkerMessage::ListEntry(entry)).await
    }

    pub async fn stat_entry(&mut self, entry: DirEntry) -> Result<(), WireError> {
        self.send(&WorkerMessage::StatEntry(entry)).await
    }

    pub async fn content_type(&mut self, content_type: &str) -> Result<(), WireError> {
        self.send(&WorkerMessage::ContentType(content_type.to_string()))
            .await
    }

    pub async fn finished(&mut self) -> Result<(), WireError> {
        self.send(&WorkerMessage::Finished).await
    }

    /// Reports a failure. `fatal` declares this worker's own state
    /// undefined, excluding it from reuse.
    pub async fn error(&mut self, message: &str, fatal: bool) -> Result<(), WireError> {
        self.send(&WorkerMessage::Error {
            message: message.to_string(),
            fatal,
        })
        .await
    }

    /// Raises a warning and blocks until the caller decides.
    ///
    /// Returns true to continue. Any command other than the warning
    /// answer here means the two sides have lost sync.
    pub async fn warn(&mut self, message: &str) -> Result<bool, WireError> {
        self.send(&WorkerMessage::Warning(message.to_string()))
            .await?;
        match self.next_command().await? {
            Command::WarningAnswer { proceed } => Ok(proceed),
            other => Err(WireError::Malformed(format!(
                "expected warning answer, got {}",
                other.name()
            ))),
        }
    }
}

/// A protocol implementation hosted by [`serve`].
pub trait ProtocolWorker: Send {
    /// Handles one command, emitting frames on `io` and ending with
    /// exactly one `Finished` or `Error` frame (an aborted warning
    /// round-trip may end with neither; the engine tears the stream
    /// down).
    ///
    /// Returning `Err` abandons the stream and exits the worker; prefer
    /// [`WorkerIo::error`] for failures of the operation itself.
    fn handle(
        &mut self,
        command: Command,
        io: &mut WorkerIo,
    ) -> impl std::future::Future<Output = Result<(), WireError>> + Send;
}

/// Runs a worker over stdin/stdout until the engine goes away.
pub async fn serve<W: ProtocolWorker>(worker: W) -> Result<(), WireError> {
    serve_with(worker, WorkerIo::from_stdio()).await
}

/// Runs a worker over the given I/O; the in-process variant of [`serve`].
pub async fn serve_with<W: ProtocolWorker>(
    mut worker: W,
    mut io: WorkerIo,
) -> Result<(), WireError> {
    loop {
        let command = match io.next_command().await {
            Ok(command) => command,
            // The engine dropped us (pool eviction, shutdown): done.
            Err(WireError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };
        tracing::debug!(command = command.name(), "handling command");
        worker.handle(command, &mut io).await?;
    }
}

/// Engine-side mirror of the worker I/O, for exercising workers
/// in-process without an engine.
#[cfg(test)]
impl WorkerIo {
    pub(crate) async fn send_command(&mut self, command: &Command) -> Result<(), WireError> {
        let frame = protocol::encode(command)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub(crate) async fn engine_recv(&mut self) -> Result<WorkerMessage, WireError> {
        loop {
            if let Some(message) = protocol::decode::<WorkerMessage>(&mut self.rx)? {
                return Ok(message);
            }
            match self.reader.read_buf(&mut self.rx).await {
                Ok(0) => return Err(WireError::Closed),
                Ok(_) => {}
                Err(e) => return Err(WireError::Io(e)),
            }
        }
    }
}

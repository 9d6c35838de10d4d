//! Engine-side handle for one out-of-process worker.
//!
//! A [`Worker`] owns the child process (when there is one) and both ends
//! of its framed stdin/stdout stream. The handle is deliberately not
//! `Clone`: a worker is owned either by exactly one running job or by the
//! pool, never both, and moves between them by value.

use std::path::Path;
use std::process::Stdio;

use bytes::BytesMut;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command as ProcessCommand};

use crate::error::JobError;
use crate::protocol::{self, Command, WireError, WorkerMessage};

/// Identity a worker is bound to: two workers are interchangeable for
/// reuse purposes only when all four fields match.
#[derive(Clone)]
pub struct WorkerBinding {
    pub protocol: String,
    /// Authority string (`host` or `host:port`), when the protocol has one.
    pub host: Option<String>,
    pub user: Option<String>,
    pub credential: Option<SecretString>,
}

impl WorkerBinding {
    /// Binding with no origin, as used by local protocols.
    pub fn protocol_only(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            host: None,
            user: None,
            credential: None,
        }
    }

    /// Returns true when the binding names a specific origin.
    pub fn has_origin(&self) -> bool {
        self.host.is_some() || self.user.is_some() || self.credential.is_some()
    }

    fn credential_str(&self) -> Option<&str> {
        self.credential.as_ref().map(|c| c.expose_secret())
    }
}

impl PartialEq for WorkerBinding {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.host == other.host
            && self.user == other.user
            && self.credential_str() == other.credential_str()
    }
}

impl Eq for WorkerBinding {}

impl std::hash::Hash for WorkerBinding {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.host.hash(state);
        self.user.hash(state);
        self.credential_str().hash(state);
    }
}

impl std::fmt::Debug for WorkerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerBinding")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("user", &self.user)
            .field(
                "credential",
                &self.credential.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A live worker and its framed byte stream.
pub struct Worker {
    binding: WorkerBinding,
    process: Option<Child>,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    rx: BytesMut,
    alive: bool,
}

impl Worker {
    /// Spawns a worker process for `binding` from the given executable.
    ///
    /// The child is killed when the handle is dropped without having been
    /// pooled, so an evicted or discarded worker cannot linger.
    pub fn spawn(executable: &Path, binding: WorkerBinding) -> Result<Self, JobError> {
        let mut child = ProcessCommand::new(executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JobError::CannotLaunchWorker {
                executable: executable.display().to_string(),
                message: e.to_string(),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| JobError::CannotLaunchWorker {
                executable: executable.display().to_string(),
                message: "child stdin unavailable".into(),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JobError::CannotLaunchWorker {
                executable: executable.display().to_string(),
                message: "child stdout unavailable".into(),
            })?;

        tracing::debug!(
            protocol = %binding.protocol,
            executable = %executable.display(),
            pid = child.id(),
            "spawned worker"
        );

        Ok(Self {
            binding,
            process: Some(child),
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            rx: BytesMut::with_capacity(8 * 1024),
            alive: true,
        })
    }

    /// Wraps an existing duplex stream as a worker.
    ///
    /// Intended for in-process workers and tests; pairs naturally with
    /// `tokio::io::duplex`.
    pub fn from_stream<S>(stream: S, binding: WorkerBinding) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            binding,
            process: None,
            reader: Box::new(reader),
            writer: Box::new(writer),
            rx: BytesMut::with_capacity(8 * 1024),
            alive: true,
        }
    }

    /// The binding this worker was created for.
    pub fn binding(&self) -> &WorkerBinding {
        &self.binding
    }

    /// OS process id, when the worker is process-backed.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|c| c.id())
    }

    /// False once the stream has closed, erred, or produced garbage.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Writes one framed command to the worker.
    pub async fn send(&mut self, command: &Command) -> Result<(), WireError> {
        let frame = protocol::encode(command)?;
        let result = async {
            self.writer.write_all(&frame).await?;
            self.writer.flush().await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            self.alive = false;
        }
        result
    }

    /// Reads the next framed message from the worker.
    ///
    /// Any failure (closed stream, oversized or undecodable frame) marks
    /// the worker dead; its internal state is undefined afterwards and it
    /// must not be reused.
    pub async fn next_message(&mut self) -> Result<WorkerMessage, WireError> {
        loop {
            match protocol::decode::<WorkerMessage>(&mut self.rx) {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => {}
                Err(e) => {
                    self.alive = false;
                    return Err(e);
                }
            }

            let read = self.reader.read_buf(&mut self.rx).await;
            match read {
                Ok(0) => {
                    self.alive = false;
                    return Err(WireError::Closed);
                }
                Ok(_) => {}
                Err(e) => {
                    self.alive = false;
                    return Err(WireError::Io(e));
                }
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("binding", &self.binding)
            .field("pid", &self.pid())
            .field("alive", &self.alive)
            .finish()
    }
}

//! Command and response frames.
//!
//! [`Command`] frames flow engine → worker, [`WorkerMessage`] frames flow
//! worker → engine. Data transfers are chunked; uploads are paced by the
//! worker requesting each chunk with [`WorkerMessage::DataRequest`].

use serde::{Deserialize, Serialize};

/// Preferred payload size for `Data` frames.
pub const DATA_CHUNK_SIZE: usize = 64 * 1024;

/// A command sent by the engine to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Download the target, streaming its contents back as `Data` frames.
    Get {
        /// Full target locator, credential included
        target: String,
    },
    /// Upload `size` bytes to the target. The worker paces the transfer
    /// with `DataRequest`; the engine answers with `Data` then `DataEnd`.
    Put {
        target: String,
        size: u64,
        overwrite: bool,
    },
    /// Copy source to destination within the worker's protocol.
    Copy { source: String, dest: String },
    /// Move source to destination within the worker's protocol.
    Move { source: String, dest: String },
    /// Delete the target (a file, or an empty directory).
    Delete { target: String },
    /// Create a directory at the target.
    Mkdir { target: String },
    /// List the target directory, one `ListEntry` frame per entry.
    List { target: String },
    /// Stat the target, answered with a single `StatEntry` frame.
    Stat { target: String },
    /// Mount a device (local-filesystem workers only).
    Mount {
        read_only: bool,
        fstype: Option<String>,
        device: String,
        point: String,
    },
    /// Unmount a mount point (local-filesystem workers only).
    Unmount { point: String },
    /// Protocol-specific escape hatch; payload is opaque to the engine.
    Special { payload: Vec<u8> },
    /// One chunk of upload payload, answering a `DataRequest`.
    Data(Vec<u8>),
    /// End of upload payload.
    DataEnd,
    /// Caller's continue/abort decision for a pending `Warning`.
    WarningAnswer { proceed: bool },
}

impl Command {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Put { .. } => "put",
            Self::Copy { .. } => "copy",
            Self::Move { .. } => "move",
            Self::Delete { .. } => "delete",
            Self::Mkdir { .. } => "mkdir",
            Self::List { .. } => "list",
            Self::Stat { .. } => "stat",
            Self::Mount { .. } => "mount",
            Self::Unmount { .. } => "unmount",
            Self::Special { .. } => "special",
            Self::Data(_) => "data",
            Self::DataEnd => "data-end",
            Self::WarningAnswer { .. } => "warning-answer",
        }
    }
}

/// A frame sent by a worker back to the engine.
///
/// Progress frames (`TotalSize` through `Speed`) are informational and
/// never gate completion. Exactly one of `Finished` or `Error` ends a
/// command; everything the worker emits before that is delivered to the
/// owning job in stream order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Total payload size of the operation, in bytes.
    TotalSize(u64),
    /// Bytes processed so far.
    ProcessedSize(u64),
    /// Total number of files the operation covers.
    TotalFiles(u64),
    /// Files processed so far.
    ProcessedFiles(u64),
    /// Total number of directories the operation covers.
    TotalDirs(u64),
    /// Directories processed so far.
    ProcessedDirs(u64),
    /// Current transfer speed in bytes per second; 0 means stalled.
    Speed(u64),
    /// One chunk of download payload.
    Data(Vec<u8>),
    /// Request for the next upload chunk.
    DataRequest,
    /// One directory entry of a `List` command.
    ListEntry(DirEntry),
    /// The single answer to a `Stat` command.
    StatEntry(DirEntry),
    /// Whether an interrupted `Put` could be resumed.
    CanResume(bool),
    /// The operation was redirected to a new target.
    Redirect(String),
    /// Detected content type of a `Get` payload.
    ContentType(String),
    /// Non-fatal advisory; the worker blocks until a `WarningAnswer`
    /// command arrives.
    Warning(String),
    /// The command failed. `fatal` marks the worker's own state as
    /// undefined, excluding it from reuse.
    Error { message: String, fatal: bool },
    /// The command completed successfully.
    Finished,
}

impl WorkerMessage {
    /// Returns true for frames that update progress counters.
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            Self::TotalSize(_)
                | Self::ProcessedSize(_)
                | Self::TotalFiles(_)
                | Self::ProcessedFiles(_)
                | Self::TotalDirs(_)
                | Self::ProcessedDirs(_)
                | Self::Speed(_)
        )
    }

    /// Returns true for the frames that end a command.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error { .. })
    }
}

/// Kind of filesystem object a directory entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// One directory entry, as reported by `List` and `Stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name (no path components).
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes; 0 when unknown.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub modified: Option<u64>,
    /// Unix permission bits, when the protocol exposes them.
    pub permissions: Option<u32>,
}

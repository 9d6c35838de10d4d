//! Job notifications.
//!
//! Every job exposes one event stream. Subscribers read whichever events
//! they care about; exactly one of [`JobEvent::Finished`],
//! [`JobEvent::Failed`] or [`JobEvent::Canceled`] ends the stream.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::JobError;
use crate::job::JobId;
use crate::protocol::DirEntry;

/// Snapshot of a job's progress counters.
///
/// Progress is informational only; it never gates completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub total_files: u64,
    pub processed_files: u64,
    pub total_dirs: u64,
    pub processed_dirs: u64,
    /// Current transfer speed; 0 while stalled.
    pub bytes_per_second: u64,
    /// Whole percent of bytes processed, 0 while the total is unknown.
    pub percent: u8,
    /// True when the worker last reported a speed of zero.
    pub stalled: bool,
}

impl Progress {
    /// Estimated time remaining, when a speed and total are known.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        if self.bytes_per_second == 0 || self.total_bytes < self.processed_bytes {
            return None;
        }
        let left = self.total_bytes - self.processed_bytes;
        Some(std::time::Duration::from_secs(left / self.bytes_per_second))
    }
}

/// Reply handle for a [`JobEvent::Warning`].
///
/// The worker is blocked until the caller answers. Dropping the handle
/// without answering counts as abort, so an ignored warning can never
/// let a questionable operation proceed.
pub struct WarningReply {
    tx: Option<oneshot::Sender<bool>>,
}

impl WarningReply {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Tell the worker to continue.
    pub fn proceed(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(true);
        }
    }

    /// Abort the operation; the job ends as canceled.
    pub fn abort(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(false);
        }
    }
}

impl std::fmt::Debug for WarningReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarningReply")
            .field("answered", &self.tx.is_none())
            .finish()
    }
}

/// Notifications emitted by a running job.
#[derive(Debug)]
pub enum JobEvent {
    /// The command was dispatched to its worker.
    Started { id: JobId },
    /// Progress counters changed.
    Progress { id: JobId, progress: Progress },
    /// One chunk of download payload.
    Data { id: JobId, chunk: Bytes },
    /// The buffered head of a peek-mode download, delivered once.
    Preview {
        id: JobId,
        data: Bytes,
        content_type: Option<String>,
    },
    /// One directory entry of a listing.
    ListEntry { id: JobId, entry: DirEntry },
    /// The answer to a stat job.
    StatEntry { id: JobId, entry: DirEntry },
    /// Whether an interrupted upload could be resumed.
    CanResume { id: JobId, resumable: bool },
    /// The worker redirected the operation to a new target.
    Redirected { id: JobId, target: String },
    /// Detected content type of the payload.
    ContentType { id: JobId, content_type: String },
    /// Non-fatal advisory; answer via `reply` to let the worker continue.
    Warning {
        id: JobId,
        message: String,
        reply: WarningReply,
    },
    /// Terminal: the job completed.
    Finished { id: JobId },
    /// Terminal: the job failed.
    Failed { id: JobId, error: JobError },
    /// Terminal: the job was killed.
    Canceled { id: JobId },
}

impl JobEvent {
    /// The job this event belongs to.
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Started { id }
            | Self::Progress { id, .. }
            | Self::Data { id, .. }
            | Self::Preview { id, .. }
            | Self::ListEntry { id, .. }
            | Self::StatEntry { id, .. }
            | Self::CanResume { id, .. }
            | Self::Redirected { id, .. }
            | Self::ContentType { id, .. }
            | Self::Warning { id, .. }
            | Self::Finished { id }
            | Self::Failed { id, .. }
            | Self::Canceled { id } => *id,
        }
    }

    /// Returns true for `Finished`, `Failed` and `Canceled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Failed { .. } | Self::Canceled { .. }
        )
    }
}

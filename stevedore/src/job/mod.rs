//! Job model: identifiers, command kinds, and the caller-facing handle.
//!
//! A job is one user-level operation bound to a single worker for its
//! active lifetime. Callers receive a [`JobHandle`] on submission and
//! observe the job exclusively through its event stream; exactly one
//! terminal event fires per job.

mod events;
mod progress;
pub(crate) mod runner;

pub use events::{JobEvent, Progress, WarningReply};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::JobError;
use crate::locator::{Locator, FILE_PROTOCOL};
use crate::protocol::Command;
use crate::registry::{JobEntry, JobState};
use crate::worker::WorkerBinding;

/// Global counter backing [`JobId::new`].
static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a job.
///
/// Ids are monotonically assigned and unique within a process lifetime;
/// they are what callers hold on to for lookup and kill-by-id, which is
/// why terminal cleanup removes the id from the registry before the
/// terminal event is observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

impl JobId {
    /// Allocates the next id.
    pub fn new() -> Self {
        Self(JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// The kind of operation a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Mount,
    Unmount,
    Copy,
    Move,
    Delete,
    Mkdir,
    Get,
    Put,
    List,
    Stat,
    Special,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::Mkdir => "mkdir",
            Self::Get => "get",
            Self::Put => "put",
            Self::List => "list",
            Self::Stat => "stat",
            Self::Special => "special",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fully-specified work for one job.
#[derive(Debug, Clone)]
pub(crate) enum JobSpec {
    Copy {
        source: Locator,
        dest: Locator,
    },
    Move {
        source: Locator,
        dest: Locator,
    },
    Delete {
        target: Locator,
    },
    Mkdir {
        target: Locator,
    },
    Get {
        target: Locator,
        /// Peek-buffering threshold in bytes, when set.
        preview: Option<usize>,
    },
    Put {
        target: Locator,
        data: Bytes,
        overwrite: bool,
    },
    List {
        target: Locator,
    },
    Stat {
        target: Locator,
    },
    Mount {
        read_only: bool,
        fstype: Option<String>,
        device: String,
        point: String,
    },
    Unmount {
        point: String,
    },
    Special {
        target: Locator,
        payload: Vec<u8>,
    },
}

impl JobSpec {
    pub(crate) fn command_kind(&self) -> CommandKind {
        match self {
            Self::Copy { .. } => CommandKind::Copy,
            Self::Move { .. } => CommandKind::Move,
            Self::Delete { .. } => CommandKind::Delete,
            Self::Mkdir { .. } => CommandKind::Mkdir,
            Self::Get { .. } => CommandKind::Get,
            Self::Put { .. } => CommandKind::Put,
            Self::List { .. } => CommandKind::List,
            Self::Stat { .. } => CommandKind::Stat,
            Self::Mount { .. } => CommandKind::Mount,
            Self::Unmount { .. } => CommandKind::Unmount,
            Self::Special { .. } => CommandKind::Special,
        }
    }

    /// Binding for the worker this job needs. Mount operations always go
    /// to the local filesystem worker.
    pub(crate) fn binding(&self) -> WorkerBinding {
        match self {
            Self::Copy { source, .. } | Self::Move { source, .. } => source.binding(),
            Self::Delete { target }
            | Self::Mkdir { target }
            | Self::Get { target, .. }
            | Self::Put { target, .. }
            | Self::List { target }
            | Self::Stat { target }
            | Self::Special { target, .. } => target.binding(),
            Self::Mount { .. } | Self::Unmount { .. } => {
                WorkerBinding::protocol_only(FILE_PROTOCOL)
            }
        }
    }

    /// The wire command opening this job.
    pub(crate) fn command(&self) -> Command {
        match self {
            Self::Copy { source, dest } => Command::Copy {
                source: source.wire_target(),
                dest: dest.wire_target(),
            },
            Self::Move { source, dest } => Command::Move {
                source: source.wire_target(),
                dest: dest.wire_target(),
            },
            Self::Delete { target } => Command::Delete {
                target: target.wire_target(),
            },
            Self::Mkdir { target } => Command::Mkdir {
                target: target.wire_target(),
            },
            Self::Get { target, .. } => Command::Get {
                target: target.wire_target(),
            },
            Self::Put {
                target,
                data,
                overwrite,
            } => Command::Put {
                target: target.wire_target(),
                size: data.len() as u64,
                overwrite: *overwrite,
            },
            Self::List { target } => Command::List {
                target: target.wire_target(),
            },
            Self::Stat { target } => Command::Stat {
                target: target.wire_target(),
            },
            Self::Mount {
                read_only,
                fstype,
                device,
                point,
            } => Command::Mount {
                read_only: *read_only,
                fstype: fstype.clone(),
                device: device.clone(),
                point: point.clone(),
            },
            Self::Unmount { point } => Command::Unmount {
                point: point.clone(),
            },
            Self::Special { payload, .. } => Command::Special {
                payload: payload.clone(),
            },
        }
    }

    /// Credential-free description of the primary target, for the
    /// registry and logs.
    pub(crate) fn target_display(&self) -> String {
        match self {
            Self::Copy { source, .. } | Self::Move { source, .. } => source.to_string(),
            Self::Delete { target }
            | Self::Mkdir { target }
            | Self::Get { target, .. }
            | Self::Put { target, .. }
            | Self::List { target }
            | Self::Stat { target }
            | Self::Special { target, .. } => target.to_string(),
            Self::Mount { device, .. } => device.clone(),
            Self::Unmount { point } => point.clone(),
        }
    }
}

/// Outcome of a job, as seen by [`JobHandle::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Finished,
    Failed(JobError),
    Canceled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// Caller-facing handle for a submitted job.
///
/// Dropping the handle does not kill the job; it merely stops observing
/// it. Use [`JobHandle::kill`] for cancellation.
pub struct JobHandle {
    id: JobId,
    entry: Arc<JobEntry>,
    events: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobHandle {
    pub(crate) fn new(
        id: JobId,
        entry: Arc<JobEntry>,
        events: mpsc::UnboundedReceiver<JobEvent>,
    ) -> Self {
        Self { id, entry, events }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        self.entry.state()
    }

    /// Receives the next notification. Returns `None` once the stream is
    /// drained past the terminal event.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Kills the job; a `canceled` notification replaces the normal
    /// terminal event.
    pub fn kill(&self) {
        self.entry.cancel();
    }

    /// Kills the job without emitting the `canceled` notification.
    pub fn kill_quiet(&self) {
        self.entry.cancel_quiet();
    }

    /// Drains events until the terminal one and maps it to an outcome.
    ///
    /// Warnings encountered along the way are answered with "continue";
    /// callers that need to veto warnings must consume events themselves
    /// via [`JobHandle::next_event`].
    pub async fn wait(mut self) -> JobOutcome {
        while let Some(event) = self.events.recv().await {
            match event {
                JobEvent::Finished { .. } => return JobOutcome::Finished,
                JobEvent::Failed { error, .. } => return JobOutcome::Failed(error),
                JobEvent::Canceled { .. } => return JobOutcome::Canceled,
                JobEvent::Warning { reply, .. } => reply.proceed(),
                _ => {}
            }
        }
        // The runner dropped its sender without a terminal event; only a
        // lost task can cause this.
        JobOutcome::Failed(JobError::Internal("job runner vanished".into()))
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

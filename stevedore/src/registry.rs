//! Registry of live jobs.
//!
//! Every submitted job is tracked here by its id until it reaches a
//! terminal state, enabling lookup and kill-by-id from anywhere in the
//! embedding application. The runner removes a job's id strictly before
//! emitting its terminal notification, so an id observed from a terminal
//! event can never resolve back to a live entry.
//!
//! Uses lock-free structures; there is no global instance — the engine
//! injects a registry so tests and embedders can own their own.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::job::{CommandKind, JobId};

/// Lifecycle state of a job.
///
/// Stored as an atomic u8 so any holder of the entry can observe
/// transitions without locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    /// Command and targets recorded; nothing running yet.
    Created = 0,
    /// Worker acquisition in flight.
    AwaitingWorker = 1,
    /// Command sent; frames are being dispatched.
    Dispatched = 2,
    /// Terminal: completed successfully.
    Finished = 3,
    /// Terminal: failed.
    Failed = 4,
    /// Terminal: killed by the caller.
    Canceled = 5,
}

impl JobState {
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Created),
            1 => Some(Self::AwaitingWorker),
            2 => Some(Self::Dispatched),
            3 => Some(Self::Finished),
            4 => Some(Self::Failed),
            5 => Some(Self::Canceled),
            _ => None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingWorker => "awaiting-worker",
            Self::Dispatched => "dispatched",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry for a tracked job.
pub struct JobEntry {
    pub job_id: JobId,
    pub command: CommandKind,
    /// Credential-free rendering of the primary target.
    pub target: String,
    pub started_at: Instant,
    state: AtomicU8,
    cancellation_token: CancellationToken,
    quiet: AtomicBool,
}

impl JobEntry {
    fn new(
        job_id: JobId,
        command: CommandKind,
        target: String,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            command,
            target,
            started_at: Instant::now(),
            state: AtomicU8::new(JobState::Created as u8),
            cancellation_token,
            quiet: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(JobState::Created)
    }

    #[inline]
    pub(crate) fn set_state(&self, state: JobState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Requests cancellation. Frames still in flight from the worker are
    /// discarded once this fires.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Cancellation that suppresses the `canceled` notification.
    pub fn cancel_quiet(&self) {
        self.quiet.store(true, Ordering::Release);
        self.cancellation_token.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    #[inline]
    pub(crate) fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::Acquire)
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}

impl std::fmt::Debug for JobEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEntry")
            .field("job_id", &self.job_id)
            .field("command", &self.command)
            .field("target", &self.target)
            .field("state", &self.state())
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Registry mapping job ids to live entries.
pub struct JobRegistry {
    jobs: DashMap<JobId, Arc<JobEntry>>,
    total_jobs: AtomicU64,
    finished_jobs: AtomicU64,
    failed_jobs: AtomicU64,
    canceled_jobs: AtomicU64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            total_jobs: AtomicU64::new(0),
            finished_jobs: AtomicU64::new(0),
            failed_jobs: AtomicU64::new(0),
            canceled_jobs: AtomicU64::new(0),
        }
    }

    /// Registers a new job and returns its shared entry.
    pub(crate) fn register(
        &self,
        job_id: JobId,
        command: CommandKind,
        target: String,
        cancellation_token: CancellationToken,
    ) -> Arc<JobEntry> {
        let entry = Arc::new(JobEntry::new(job_id, command, target, cancellation_token));
        self.jobs.insert(job_id, Arc::clone(&entry));
        self.total_jobs.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            job_id = %job_id,
            command = %entry.command,
            target = %entry.target,
            "registered job"
        );
        entry
    }

    /// Looks up a live job by id. Terminal jobs are no longer resolvable.
    pub fn get(&self, job_id: JobId) -> Option<Arc<JobEntry>> {
        self.jobs.get(&job_id).map(|r| Arc::clone(r.value()))
    }

    /// Kills a live job. Returns false when the id is not (or no longer)
    /// registered. `quiet` suppresses the `canceled` notification.
    pub fn kill(&self, job_id: JobId, quiet: bool) -> bool {
        match self.get(job_id) {
            Some(entry) => {
                if quiet {
                    entry.cancel_quiet();
                } else {
                    entry.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Removes a job that finished successfully.
    pub(crate) fn complete(&self, job_id: JobId) {
        if let Some((_, entry)) = self.jobs.remove(&job_id) {
            self.finished_jobs.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                job_id = %job_id,
                elapsed_ms = entry.elapsed().as_millis() as u64,
                "job finished"
            );
        }
    }

    /// Removes a job that failed.
    pub(crate) fn fail(&self, job_id: JobId) {
        if let Some((_, entry)) = self.jobs.remove(&job_id) {
            self.failed_jobs.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                job_id = %job_id,
                command = %entry.command,
                elapsed_ms = entry.elapsed().as_millis() as u64,
                "job failed"
            );
        }
    }

    /// Removes a job that was killed.
    pub(crate) fn mark_canceled(&self, job_id: JobId) {
        if let Some((_, entry)) = self.jobs.remove(&job_id) {
            self.canceled_jobs.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                job_id = %job_id,
                elapsed_ms = entry.elapsed().as_millis() as u64,
                "job canceled"
            );
        }
    }

    /// Number of live jobs.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.jobs.len()
    }

    /// Snapshot of registry counters.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_jobs: self.jobs.len(),
            total_jobs: self.total_jobs.load(Ordering::Relaxed),
            finished_jobs: self.finished_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            canceled_jobs: self.canceled_jobs.load(Ordering::Relaxed),
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of registry counters.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub active_jobs: usize,
    pub total_jobs: u64,
    pub finished_jobs: u64,
    pub failed_jobs: u64,
    pub canceled_jobs: u64,
}

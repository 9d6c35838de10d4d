//! The job engine.
//!
//! [`Engine`] ties the three shared structures together — the protocol
//! registry, the worker pool, and the job registry — and exposes one
//! entry point per operation. Each operation spawns a runner task and
//! returns a [`JobHandle`] immediately; all further interaction happens
//! through the handle's event stream.
//!
//! There are no process-wide singletons: tests and embedders construct
//! engines (and their parts) freely, and two engines sharing a pool share
//! workers.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::JobError;
use crate::job::runner::JobRunner;
use crate::job::{JobHandle, JobId, JobSpec};
use crate::locator::Locator;
use crate::pool::WorkerPool;
use crate::protocols::ProtocolRegistry;
use crate::registry::JobRegistry;

/// Job engine handle. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
    protocols: Arc<ProtocolRegistry>,
}

impl Engine {
    /// Builds an engine from configuration.
    pub fn new(config: EngineConfig) -> Self {
        let protocols = ProtocolRegistry::from_map(config.workers);
        Self::with_parts(
            Arc::new(protocols),
            Arc::new(WorkerPool::new(config.pool)),
            Arc::new(JobRegistry::new()),
        )
    }

    /// Builds an engine from separately owned parts.
    pub fn with_parts(
        protocols: Arc<ProtocolRegistry>,
        pool: Arc<WorkerPool>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            registry,
            pool,
            protocols,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn protocols(&self) -> &Arc<ProtocolRegistry> {
        &self.protocols
    }

    /// Copies `source` to `dest`.
    pub fn copy(&self, source: &str, dest: &str) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Copy {
            source: Locator::parse(source)?,
            dest: Locator::parse(dest)?,
        }))
    }

    /// Moves `source` to `dest`.
    pub fn move_to(&self, source: &str, dest: &str) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Move {
            source: Locator::parse(source)?,
            dest: Locator::parse(dest)?,
        }))
    }

    /// Deletes the target (a file, or an empty directory).
    pub fn delete(&self, target: &str) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Delete {
            target: Locator::parse(target)?,
        }))
    }

    /// Creates a directory at the target.
    pub fn mkdir(&self, target: &str) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Mkdir {
            target: Locator::parse(target)?,
        }))
    }

    /// Downloads the target, streaming `Data` events.
    pub fn get(&self, target: &str) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Get {
            target: Locator::parse(target)?,
            preview: None,
        }))
    }

    /// Downloads the target in peek mode: the first `preview_bytes` bytes
    /// are buffered and delivered as a single `Preview` event (with the
    /// detected content type, if any) before normal streaming resumes.
    pub fn get_with_preview(
        &self,
        target: &str,
        preview_bytes: usize,
    ) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Get {
            target: Locator::parse(target)?,
            preview: Some(preview_bytes),
        }))
    }

    /// Uploads `data` to the target.
    pub fn put(&self, target: &str, data: Bytes, overwrite: bool) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Put {
            target: Locator::parse(target)?,
            data,
            overwrite,
        }))
    }

    /// Lists the target directory, one `ListEntry` event per entry.
    pub fn list(&self, target: &str) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::List {
            target: Locator::parse(target)?,
        }))
    }

    /// Stats the target, answered by a single `StatEntry` event.
    pub fn stat(&self, target: &str) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Stat {
            target: Locator::parse(target)?,
        }))
    }

    /// Mounts a device via the local filesystem worker.
    pub fn mount(
        &self,
        read_only: bool,
        fstype: Option<&str>,
        device: &str,
        point: &str,
    ) -> JobHandle {
        self.submit(JobSpec::Mount {
            read_only,
            fstype: fstype.map(str::to_string),
            device: device.to_string(),
            point: point.to_string(),
        })
    }

    /// Unmounts a mount point via the local filesystem worker.
    pub fn unmount(&self, point: &str) -> JobHandle {
        self.submit(JobSpec::Unmount {
            point: point.to_string(),
        })
    }

    /// Sends a protocol-specific command; the payload is opaque to the
    /// engine.
    pub fn special(&self, target: &str, payload: Vec<u8>) -> Result<JobHandle, JobError> {
        Ok(self.submit(JobSpec::Special {
            target: Locator::parse(target)?,
            payload,
        }))
    }

    /// Kills a live job by id. Returns false when the id is unknown or
    /// already terminal.
    pub fn kill(&self, id: JobId) -> bool {
        self.registry.kill(id, false)
    }

    /// Kills a live job without emitting its `canceled` notification.
    pub fn kill_quiet(&self, id: JobId) -> bool {
        self.registry.kill(id, true)
    }

    /// Registers the job and spawns its runner. Must be called within a
    /// Tokio runtime.
    fn submit(&self, spec: JobSpec) -> JobHandle {
        let id = JobId::new();
        let token = CancellationToken::new();
        let entry =
            self.registry
                .register(id, spec.command_kind(), spec.target_display(), token);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let runner = JobRunner::new(
            id,
            spec,
            Arc::clone(&entry),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            Arc::clone(&self.protocols),
            events_tx,
        );
        tokio::spawn(runner.run());

        JobHandle::new(id, entry, events_rx)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("active_jobs", &self.registry.active_count())
            .field("idle_workers", &self.pool.total_idle())
            .finish()
    }
}

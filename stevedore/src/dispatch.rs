//! Frame dispatch for one worker stream.
//!
//! A [`Dispatcher`] bridges a worker's byte stream into decoded frames for
//! the owning job, preserving stream order. A stream that closes or turns
//! to garbage is surfaced as a synthesized [`DispatchOutcome::WorkerDied`]
//! instead of an error the job would have to interpret, and cancellation
//! always wins over frames still in flight.
//!
//! The dispatcher must be detached with [`Dispatcher::unwatch`] before its
//! worker can be pooled; a worker that died or was canceled is dropped via
//! [`Dispatcher::discard`] instead.

use tokio_util::sync::CancellationToken;

use crate::protocol::{Command, WireError, WorkerMessage};
use crate::worker::Worker;

/// What the dispatch loop produced.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A decoded frame, in stream order.
    Frame(WorkerMessage),
    /// The worker's stream closed or produced undecodable bytes.
    WorkerDied,
    /// The job's cancellation token fired.
    Canceled,
}

/// Owns a worker for the duration of one job's dispatch loop.
pub struct Dispatcher {
    worker: Worker,
    token: CancellationToken,
}

impl Dispatcher {
    /// Starts watching the worker's stream on behalf of a job.
    pub fn watch(worker: Worker, token: CancellationToken) -> Self {
        Self { worker, token }
    }

    /// Waits for the next frame, cancellation, or worker death.
    ///
    /// Cancellation is polled first, so a kill is honored even when the
    /// dying worker still has frames queued.
    pub async fn next(&mut self) -> DispatchOutcome {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => DispatchOutcome::Canceled,
            message = self.worker.next_message() => match message {
                Ok(frame) => DispatchOutcome::Frame(frame),
                Err(WireError::Closed) => {
                    tracing::debug!(
                        protocol = %self.worker.binding().protocol,
                        "worker stream closed without terminal frame"
                    );
                    DispatchOutcome::WorkerDied
                }
                Err(e) => {
                    tracing::warn!(
                        protocol = %self.worker.binding().protocol,
                        error = %e,
                        "worker stream unusable"
                    );
                    DispatchOutcome::WorkerDied
                }
            },
        }
    }

    /// Forwards a command to the worker mid-dispatch (warning answers,
    /// upload chunks).
    pub async fn send(&mut self, command: &Command) -> Result<(), WireError> {
        self.worker.send(command).await
    }

    /// Protocol of the watched worker.
    pub fn protocol(&self) -> &str {
        &self.worker.binding().protocol
    }

    /// Detaches and returns the worker, e.g. for pooling.
    pub fn unwatch(self) -> Worker {
        self.worker
    }

    /// Detaches and destroys the worker.
    pub fn discard(self) {
        tracing::debug!(
            protocol = %self.worker.binding().protocol,
            pid = self.worker.pid(),
            "discarding worker"
        );
    }
}

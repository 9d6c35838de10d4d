//! Error types for the job engine.
//!
//! Errors are categorized by where they arise: before a worker is involved
//! (target parsing, protocol resolution, process launch) or mid-transfer
//! (worker death, worker-reported failures). The distinction matters because
//! it decides whether a worker has to be released, and whether it may be
//! returned to the pool.

use thiserror::Error;

/// Errors a job can surface to its caller.
///
/// A job ends with exactly one of `finished`, `failed`, or `canceled`;
/// cancellation is caller-initiated and deliberately not represented here,
/// so that callers can suppress error handling for it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    /// The target locator could not be parsed.
    #[error("malformed target locator: {0}")]
    MalformedTarget(String),

    /// No worker executable is registered for the protocol.
    #[error("no worker registered for protocol '{0}'")]
    UnsupportedProtocol(String),

    /// A worker executable was found but the process could not be started.
    #[error("failed to launch worker '{executable}': {message}")]
    CannotLaunchWorker {
        /// Path of the executable that failed to start
        executable: String,
        /// OS-level launch failure
        message: String,
    },

    /// The worker process terminated, or its stream became unreadable,
    /// without a clean terminal frame.
    #[error("worker for protocol '{0}' died unexpectedly")]
    WorkerDied(String),

    /// The worker reported a protocol-level failure.
    ///
    /// `fatal` is set by the worker when its own state is no longer sound;
    /// a non-fatal report (e.g. "file not found") leaves the worker healthy
    /// and eligible for reuse.
    #[error("{message}")]
    WorkerReported {
        /// Human-readable message supplied by the worker
        message: String,
        /// Whether the worker considers itself unusable afterwards
        fatal: bool,
    },

    /// Engine-internal failure (e.g. the runner task was lost).
    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if the worker that produced this error may be pooled.
    ///
    /// Only a clean, non-fatal worker report leaves the worker in a defined
    /// state. Death and launch failures never do, and acquisition errors
    /// involve no worker at all.
    pub fn worker_reusable(&self) -> bool {
        matches!(self, Self::WorkerReported { fatal: false, .. })
    }

    /// Returns true if the error was raised before a worker was acquired.
    pub fn is_acquisition_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedTarget(_)
                | Self::UnsupportedProtocol(_)
                | Self::CannotLaunchWorker { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_reusable_only_for_non_fatal_reports() {
        assert!(JobError::WorkerReported {
            message: "file not found".into(),
            fatal: false,
        }
        .worker_reusable());

        assert!(!JobError::WorkerReported {
            message: "session corrupt".into(),
            fatal: true,
        }
        .worker_reusable());

        assert!(!JobError::WorkerDied("ftp".into()).worker_reusable());
        assert!(!JobError::UnsupportedProtocol("foo".into()).worker_reusable());
    }

    #[test]
    fn acquisition_errors_are_classified() {
        assert!(JobError::MalformedTarget("x".into()).is_acquisition_error());
        assert!(JobError::UnsupportedProtocol("foo".into()).is_acquisition_error());
        assert!(JobError::CannotLaunchWorker {
            executable: "/bin/nope".into(),
            message: "no such file".into(),
        }
        .is_acquisition_error());

        assert!(!JobError::WorkerDied("ftp".into()).is_acquisition_error());
    }

    #[test]
    fn display_includes_context() {
        let err = JobError::UnsupportedProtocol("gopher".into());
        assert_eq!(
            format!("{}", err),
            "no worker registered for protocol 'gopher'"
        );

        let err = JobError::WorkerReported {
            message: "permission denied".into(),
            fatal: false,
        };
        assert_eq!(format!("{}", err), "permission denied");
    }
}

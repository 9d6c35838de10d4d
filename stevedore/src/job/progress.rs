//! Progress accounting for a running job.

use crate::job::events::Progress;
use crate::protocol::WorkerMessage;

/// Folds progress frames into a running [`Progress`] snapshot.
///
/// Percent is recomputed whenever processed bytes change and a total is
/// known; a speed report of zero flags the transfer as stalled, matching
/// how workers signal a dried-up connection.
#[derive(Debug, Default)]
pub(crate) struct ProgressTracker {
    current: Progress,
}

impl ProgressTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Applies a frame. Returns the updated snapshot for progress-bearing
    /// frames, `None` for everything else.
    pub(crate) fn apply(&mut self, message: &WorkerMessage) -> Option<Progress> {
        match message {
            WorkerMessage::TotalSize(bytes) => {
                self.current.total_bytes = *bytes;
                self.recompute_percent();
            }
            WorkerMessage::ProcessedSize(bytes) => {
                self.current.processed_bytes = *bytes;
                self.recompute_percent();
            }
            WorkerMessage::TotalFiles(files) => self.current.total_files = *files,
            WorkerMessage::ProcessedFiles(files) => self.current.processed_files = *files,
            WorkerMessage::TotalDirs(dirs) => self.current.total_dirs = *dirs,
            WorkerMessage::ProcessedDirs(dirs) => self.current.processed_dirs = *dirs,
            WorkerMessage::Speed(bytes_per_second) => {
                self.current.bytes_per_second = *bytes_per_second;
                self.current.stalled = *bytes_per_second == 0;
            }
            _ => return None,
        }
        Some(self.current)
    }

    pub(crate) fn snapshot(&self) -> Progress {
        self.current
    }

    fn recompute_percent(&mut self) {
        if self.current.total_bytes > 0 {
            let ratio =
                self.current.processed_bytes as f64 / self.current.total_bytes as f64;
            self.current.percent = (ratio * 100.0).min(100.0) as u8;
        }
    }
}

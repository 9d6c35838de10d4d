//! Execution of a single job.
//!
//! The runner owns the whole lifecycle: acquire a worker (pool first,
//! spawn second), dispatch the command, fold incoming frames into
//! notifications, and release or discard the worker on the way out. The
//! job's id is removed from the registry strictly before the terminal
//! notification is emitted, so an observer of the terminal event can
//! never resolve the id back to a live job.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::JobError;
use crate::job::events::{JobEvent, WarningReply};
use crate::job::progress::ProgressTracker;
use crate::job::{JobId, JobSpec};
use crate::pool::WorkerPool;
use crate::protocol::{Command, WorkerMessage, DATA_CHUNK_SIZE};
use crate::protocols::ProtocolRegistry;
use crate::registry::{JobEntry, JobRegistry, JobState};
use crate::worker::{Worker, WorkerBinding};

/// Chunked source for upload payloads, paced by the worker's
/// `DataRequest` frames.
struct UploadSource {
    data: Bytes,
    offset: usize,
}

impl UploadSource {
    fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + DATA_CHUNK_SIZE).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;
        Some(chunk)
    }
}

/// Accumulates the head of a peek-mode download until the threshold is
/// crossed or the transfer ends.
struct PreviewBuffer {
    buf: BytesMut,
    threshold: usize,
    content_type: Option<String>,
    flushed: bool,
}

impl PreviewBuffer {
    fn new(threshold: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            threshold,
            content_type: None,
            flushed: false,
        }
    }
}

/// How a handled frame affects the dispatch loop.
enum FrameFlow {
    Continue,
    Finished,
    Failed { error: JobError },
    Died,
    Aborted,
}

pub(crate) struct JobRunner {
    id: JobId,
    spec: JobSpec,
    entry: Arc<JobEntry>,
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
    protocols: Arc<ProtocolRegistry>,
    events: mpsc::UnboundedSender<JobEvent>,
    tracker: ProgressTracker,
    preview: Option<PreviewBuffer>,
    upload: Option<UploadSource>,
}

impl JobRunner {
    pub(crate) fn new(
        id: JobId,
        spec: JobSpec,
        entry: Arc<JobEntry>,
        registry: Arc<JobRegistry>,
        pool: Arc<WorkerPool>,
        protocols: Arc<ProtocolRegistry>,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        let preview = match &spec {
            JobSpec::Get {
                preview: Some(threshold),
                ..
            } => Some(PreviewBuffer::new(*threshold)),
            _ => None,
        };
        let upload = match &spec {
            JobSpec::Put { data, .. } => Some(UploadSource::new(data.clone())),
            _ => None,
        };

        Self {
            id,
            spec,
            entry,
            registry,
            pool,
            protocols,
            events,
            tracker: ProgressTracker::new(),
            preview,
            upload,
        }
    }

    pub(crate) async fn run(mut self) {
        self.entry.set_state(JobState::AwaitingWorker);
        let binding = self.spec.binding();

        let worker = match self.acquire(&binding) {
            Ok(worker) => worker,
            Err(error) => {
                tracing::debug!(job_id = %self.id, error = %error, "worker acquisition failed");
                self.terminal_failed(error);
                return;
            }
        };

        if self.entry.is_cancelled() {
            // Killed before dispatch; the worker was never used.
            self.pool.put(worker);
            self.terminal_canceled();
            return;
        }

        let command = self.spec.command();
        let mut dispatcher = Dispatcher::watch(worker, self.entry.token());
        if dispatcher.send(&command).await.is_err() {
            dispatcher.discard();
            self.terminal_failed(JobError::WorkerDied(binding.protocol.clone()));
            return;
        }

        self.entry.set_state(JobState::Dispatched);
        self.emit(JobEvent::Started { id: self.id });

        loop {
            match dispatcher.next().await {
                DispatchOutcome::Frame(message) => {
                    match self.handle_frame(&mut dispatcher, message).await {
                        FrameFlow::Continue => {}
                        FrameFlow::Finished => {
                            let worker = dispatcher.unwatch();
                            self.pool.put(worker);
                            self.terminal_finished();
                            return;
                        }
                        FrameFlow::Failed { error } => {
                            let worker = dispatcher.unwatch();
                            if error.worker_reusable() {
                                self.pool.put(worker);
                            } else {
                                drop(worker);
                            }
                            self.terminal_failed(error);
                            return;
                        }
                        FrameFlow::Died => {
                            dispatcher.discard();
                            self.terminal_failed(JobError::WorkerDied(
                                binding.protocol.clone(),
                            ));
                            return;
                        }
                        FrameFlow::Aborted => {
                            dispatcher.discard();
                            self.terminal_canceled();
                            return;
                        }
                    }
                }
                DispatchOutcome::WorkerDied => {
                    dispatcher.discard();
                    self.terminal_failed(JobError::WorkerDied(binding.protocol.clone()));
                    return;
                }
                DispatchOutcome::Canceled => {
                    dispatcher.discard();
                    self.terminal_canceled();
                    return;
                }
            }
        }
    }

    fn acquire(&self, binding: &WorkerBinding) -> Result<Worker, JobError> {
        if let Some(worker) = self.pool.take(binding) {
            return Ok(worker);
        }

        let executable = self
            .protocols
            .resolve(&binding.protocol)
            .ok_or_else(|| JobError::UnsupportedProtocol(binding.protocol.clone()))?;

        Worker::spawn(&executable, binding.clone())
    }

    async fn handle_frame(
        &mut self,
        dispatcher: &mut Dispatcher,
        message: WorkerMessage,
    ) -> FrameFlow {
        if message.is_progress() {
            if let Some(progress) = self.tracker.apply(&message) {
                self.emit(JobEvent::Progress {
                    id: self.id,
                    progress,
                });
            }
            return FrameFlow::Continue;
        }

        match message {
            WorkerMessage::Data(chunk) => {
                self.handle_data(chunk);
                FrameFlow::Continue
            }
            WorkerMessage::DataRequest => self.handle_data_request(dispatcher).await,
            WorkerMessage::ListEntry(entry) => {
                self.emit(JobEvent::ListEntry { id: self.id, entry });
                FrameFlow::Continue
            }
            WorkerMessage::StatEntry(entry) => {
                self.emit(JobEvent::StatEntry { id: self.id, entry });
                FrameFlow::Continue
            }
            WorkerMessage::CanResume(resumable) => {
                self.emit(JobEvent::CanResume {
                    id: self.id,
                    resumable,
                });
                FrameFlow::Continue
            }
            WorkerMessage::Redirect(target) => {
                self.emit(JobEvent::Redirected {
                    id: self.id,
                    target,
                });
                FrameFlow::Continue
            }
            WorkerMessage::ContentType(content_type) => {
                // While peeking, the content type rides along with the
                // buffered payload instead of being its own event.
                if self.preview_pending() {
                    if let Some(preview) = self.preview.as_mut() {
                        preview.content_type = Some(content_type);
                    }
                } else {
                    self.emit(JobEvent::ContentType {
                        id: self.id,
                        content_type,
                    });
                }
                FrameFlow::Continue
            }
            WorkerMessage::Warning(message) => self.handle_warning(dispatcher, message).await,
            WorkerMessage::Error { message, fatal } => FrameFlow::Failed {
                error: JobError::WorkerReported { message, fatal },
            },
            WorkerMessage::Finished => {
                self.flush_preview();
                FrameFlow::Finished
            }
            // Progress frames were consumed above.
            _ => FrameFlow::Continue,
        }
    }

    fn preview_pending(&self) -> bool {
        matches!(&self.preview, Some(preview) if !preview.flushed)
    }

    fn handle_data(&mut self, chunk: Vec<u8>) {
        if self.preview_pending() {
            let crossed = match self.preview.as_mut() {
                Some(preview) => {
                    preview.buf.extend_from_slice(&chunk);
                    preview.buf.len() >= preview.threshold
                }
                None => false,
            };
            if crossed {
                self.flush_preview();
            }
        } else {
            self.emit(JobEvent::Data {
                id: self.id,
                chunk: Bytes::from(chunk),
            });
        }
    }

    async fn handle_data_request(&mut self, dispatcher: &mut Dispatcher) -> FrameFlow {
        let Some(source) = &mut self.upload else {
            tracing::warn!(
                job_id = %self.id,
                "worker requested upload data for a non-upload job"
            );
            return FrameFlow::Continue;
        };

        let command = match source.next_chunk() {
            Some(chunk) => Command::Data(chunk),
            None => Command::DataEnd,
        };
        if dispatcher.send(&command).await.is_err() {
            return FrameFlow::Died;
        }
        FrameFlow::Continue
    }

    async fn handle_warning(
        &mut self,
        dispatcher: &mut Dispatcher,
        message: String,
    ) -> FrameFlow {
        let (reply, answer) = WarningReply::channel();
        self.emit(JobEvent::Warning {
            id: self.id,
            message,
            reply,
        });

        // The worker is blocked on our answer; a kill issued while the
        // caller deliberates still wins.
        let decision = tokio::select! {
            biased;
            _ = self.entry.token().cancelled() => None,
            answer = answer => Some(answer.unwrap_or(false)),
        };

        match decision {
            None => FrameFlow::Aborted,
            Some(true) => {
                if dispatcher
                    .send(&Command::WarningAnswer { proceed: true })
                    .await
                    .is_err()
                {
                    return FrameFlow::Died;
                }
                FrameFlow::Continue
            }
            Some(false) => {
                let _ = dispatcher
                    .send(&Command::WarningAnswer { proceed: false })
                    .await;
                FrameFlow::Aborted
            }
        }
    }

    fn flush_preview(&mut self) {
        if let Some(preview) = &mut self.preview {
            if !preview.flushed {
                preview.flushed = true;
                let data = preview.buf.split().freeze();
                let content_type = preview.content_type.take();
                self.emit(JobEvent::Preview {
                    id: self.id,
                    data,
                    content_type,
                });
            }
        }
    }

    fn emit(&self, event: JobEvent) {
        // A dropped handle stops observing; the job itself runs on.
        let _ = self.events.send(event);
    }

    fn terminal_finished(&mut self) {
        self.entry.set_state(JobState::Finished);
        self.registry.complete(self.id);
        self.emit(JobEvent::Finished { id: self.id });
    }

    fn terminal_failed(&mut self, error: JobError) {
        self.entry.set_state(JobState::Failed);
        self.registry.fail(self.id);
        self.emit(JobEvent::Failed {
            id: self.id,
            error,
        });
    }

    fn terminal_canceled(&mut self) {
        self.entry.set_state(JobState::Canceled);
        self.registry.mark_canceled(self.id);
        if !self.entry.is_quiet() {
            self.emit(JobEvent::Canceled { id: self.id });
        }
    }
}

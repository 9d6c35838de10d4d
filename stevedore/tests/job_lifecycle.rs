//! Job lifecycle tests against scripted in-process workers.
//!
//! Each test seeds the pool with a worker backed by an in-memory duplex
//! stream and drives the far side by hand, so frame timing and failure
//! injection are fully deterministic.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use stevedore::engine::Engine;
use stevedore::error::JobError;
use stevedore::job::JobEvent;
use stevedore::pool::WorkerPool;
use stevedore::protocol::{self, Command, WorkerMessage, DATA_CHUNK_SIZE};
use stevedore::protocols::ProtocolRegistry;
use stevedore::registry::{JobRegistry, JobState};
use stevedore::worker::{Worker, WorkerBinding};

/// Hand-driven far side of a worker stream.
struct ScriptedWorker {
    stream: DuplexStream,
    buf: BytesMut,
}

impl ScriptedWorker {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
        }
    }

    async fn recv_command(&mut self) -> Command {
        loop {
            if let Some(command) = protocol::decode(&mut self.buf).unwrap() {
                return command;
            }
            let read = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(read > 0, "engine closed the stream mid-script");
        }
    }

    async fn send(&mut self, message: &WorkerMessage) {
        let frame = protocol::encode(message).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }
}

fn test_binding() -> WorkerBinding {
    WorkerBinding {
        protocol: "test".into(),
        host: Some("origin".into()),
        user: None,
        credential: None,
    }
}

/// Engine whose pool already holds one scripted worker for `test://origin`.
fn seeded_engine() -> (Engine, ScriptedWorker) {
    let (near, far) = tokio::io::duplex(256 * 1024);
    let pool = Arc::new(WorkerPool::default());
    pool.put(Worker::from_stream(near, test_binding()));

    let engine = Engine::with_parts(
        Arc::new(ProtocolRegistry::new()),
        pool,
        Arc::new(JobRegistry::new()),
    );
    (engine, ScriptedWorker::new(far))
}

#[tokio::test]
async fn progress_streams_in_order_then_finishes_once() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine
        .copy("test://origin/src", "test://origin/dst")
        .unwrap();
    let id = handle.id();

    assert!(matches!(
        worker.recv_command().await,
        Command::Copy { .. }
    ));
    worker.send(&WorkerMessage::TotalSize(1000)).await;
    worker.send(&WorkerMessage::ProcessedSize(400)).await;
    worker.send(&WorkerMessage::ProcessedSize(1000)).await;
    worker.send(&WorkerMessage::Finished).await;

    let mut progress_updates = Vec::new();
    let mut terminals = 0;
    let mut saw_started = false;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Started { .. } => saw_started = true,
            JobEvent::Progress { progress, .. } => progress_updates.push(progress),
            JobEvent::Finished { id: done } => {
                assert_eq!(done, id);
                terminals += 1;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert!(saw_started);
    assert_eq!(terminals, 1, "terminal notification must fire exactly once");

    let processed: Vec<u64> = progress_updates.iter().map(|p| p.processed_bytes).collect();
    assert!(processed.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress_updates.len() >= 2);
    assert_eq!(
        progress_updates.last().unwrap().percent,
        100,
        "percent reaches 100 before the terminal event"
    );

    // Cleanup: id gone from the registry, worker back in the pool.
    assert!(engine.registry().get(id).is_none());
    assert_eq!(engine.registry().active_count(), 0);
    assert_eq!(engine.pool().idle_count("test"), 1);
    assert_eq!(handle.state(), JobState::Finished);
}

#[tokio::test]
async fn preview_buffers_head_into_single_notification() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine
        .get_with_preview("test://origin/page", 50)
        .unwrap();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker
        .send(&WorkerMessage::ContentType("text/html".into()))
        .await;
    worker.send(&WorkerMessage::Data(vec![b'a'; 20])).await;
    worker.send(&WorkerMessage::Data(vec![b'b'; 40])).await;
    worker.send(&WorkerMessage::Finished).await;

    let mut previews = Vec::new();
    let mut data_events = 0;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Preview {
                data, content_type, ..
            } => previews.push((data, content_type)),
            JobEvent::Data { .. } => data_events += 1,
            JobEvent::Started { .. } | JobEvent::Finished { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }

    // The threshold was crossed mid-stream: one preview carrying all 60
    // bytes, no incremental data notifications before it.
    assert_eq!(previews.len(), 1);
    let (data, content_type) = &previews[0];
    assert_eq!(data.len(), 60);
    assert_eq!(content_type.as_deref(), Some("text/html"));
    assert_eq!(data_events, 0);
}

#[tokio::test]
async fn preview_flushes_when_transfer_ends_early() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine
        .get_with_preview("test://origin/small", 1000)
        .unwrap();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker.send(&WorkerMessage::Data(vec![7u8; 30])).await;
    worker.send(&WorkerMessage::Finished).await;

    let mut previews = 0;
    while let Some(event) = handle.next_event().await {
        if let JobEvent::Preview { data, .. } = event {
            assert_eq!(data.len(), 30);
            previews += 1;
        }
    }
    assert_eq!(previews, 1);
}

#[tokio::test]
async fn data_after_preview_flush_streams_normally() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine.get_with_preview("test://origin/big", 10).unwrap();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker.send(&WorkerMessage::Data(vec![1u8; 10])).await;
    worker.send(&WorkerMessage::Data(vec![2u8; 5])).await;
    worker.send(&WorkerMessage::Finished).await;

    let mut previews = 0;
    let mut data_chunks = Vec::new();
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Preview { data, .. } => {
                assert_eq!(data.len(), 10);
                previews += 1;
            }
            JobEvent::Data { chunk, .. } => data_chunks.push(chunk),
            _ => {}
        }
    }

    assert_eq!(previews, 1);
    assert_eq!(data_chunks.len(), 1);
    assert_eq!(data_chunks[0].len(), 5);
}

#[tokio::test]
async fn dead_worker_fails_job_and_is_not_pooled() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine.get("test://origin/file").unwrap();
    let id = handle.id();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker.send(&WorkerMessage::TotalSize(10)).await;
    drop(worker); // stream closes without a terminal frame

    let mut failure = None;
    while let Some(event) = handle.next_event().await {
        if let JobEvent::Failed { error, .. } = event {
            failure = Some(error);
        }
    }
    assert_eq!(failure, Some(JobError::WorkerDied("test".into())));

    // The dead worker never re-enters the pool; a fresh request for the
    // same binding would have to spawn.
    assert_eq!(engine.pool().idle_count("test"), 0);
    assert!(engine.pool().take(&test_binding()).is_none());
    assert!(engine.registry().get(id).is_none());
    assert_eq!(handle.state(), JobState::Failed);
}

#[tokio::test]
async fn clean_worker_error_repools_worker_for_reuse() {
    let (engine, mut worker) = seeded_engine();
    let handle = engine.get("test://origin/absent").unwrap();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker
        .send(&WorkerMessage::Error {
            message: "no such file".into(),
            fatal: false,
        })
        .await;

    let outcome = handle.wait().await;
    assert_eq!(
        outcome,
        stevedore::job::JobOutcome::Failed(JobError::WorkerReported {
            message: "no such file".into(),
            fatal: false,
        })
    );

    // The worker reported cleanly and stays reusable...
    assert_eq!(engine.pool().idle_count("test"), 1);

    // ...and the next job picks it up without a spawn.
    let handle = engine.get("test://origin/present").unwrap();
    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker.send(&WorkerMessage::Finished).await;
    assert!(handle.wait().await.is_success());
}

#[tokio::test]
async fn fatal_worker_error_discards_worker() {
    let (engine, mut worker) = seeded_engine();
    let handle = engine.get("test://origin/corrupt").unwrap();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker
        .send(&WorkerMessage::Error {
            message: "session desynchronized".into(),
            fatal: true,
        })
        .await;

    match handle.wait().await {
        stevedore::job::JobOutcome::Failed(JobError::WorkerReported { fatal, .. }) => {
            assert!(fatal)
        }
        other => panic!("expected worker-reported failure, got {other:?}"),
    }
    assert_eq!(engine.pool().idle_count("test"), 0);
}

#[tokio::test]
async fn kill_mid_transfer_cancels_and_discards_worker() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine.get("test://origin/file").unwrap();
    let id = handle.id();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));

    // Wait until the job is dispatched, then kill it by id.
    match handle.next_event().await.unwrap() {
        JobEvent::Started { .. } => {}
        other => panic!("expected started, got {other:?}"),
    }
    assert!(engine.kill(id));

    let mut canceled = 0;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Canceled { .. } => canceled += 1,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(canceled, 1);

    assert!(engine.registry().get(id).is_none());
    assert_eq!(engine.pool().idle_count("test"), 0);
    assert_eq!(handle.state(), JobState::Canceled);

    // Killing again finds nothing.
    assert!(!engine.kill(id));
}

#[tokio::test]
async fn quiet_kill_suppresses_the_canceled_notification() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine.get("test://origin/file").unwrap();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    match handle.next_event().await.unwrap() {
        JobEvent::Started { .. } => {}
        other => panic!("expected started, got {other:?}"),
    }

    handle.kill_quiet();

    // The stream drains with no terminal notification at all.
    assert!(handle.next_event().await.is_none());
    assert_eq!(handle.state(), JobState::Canceled);
    assert_eq!(engine.registry().active_count(), 0);
}

#[tokio::test]
async fn warning_proceed_lets_the_worker_continue() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine.get("test://origin/file").unwrap();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker
        .send(&WorkerMessage::Warning("target is oddly large".into()))
        .await;

    let mut finished = false;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Warning { message, reply, .. } => {
                assert_eq!(message, "target is oddly large");
                reply.proceed();

                // The worker sees the answer and completes.
                assert_eq!(
                    worker.recv_command().await,
                    Command::WarningAnswer { proceed: true }
                );
                worker.send(&WorkerMessage::Finished).await;
            }
            JobEvent::Finished { .. } => finished = true,
            JobEvent::Started { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(finished);
    assert_eq!(engine.pool().idle_count("test"), 1);
}

#[tokio::test]
async fn warning_abort_ends_the_job_as_canceled() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine.get("test://origin/file").unwrap();

    assert!(matches!(worker.recv_command().await, Command::Get { .. }));
    worker
        .send(&WorkerMessage::Warning("destination exists".into()))
        .await;

    let mut canceled = 0;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Warning { reply, .. } => reply.abort(),
            JobEvent::Canceled { .. } => canceled += 1,
            JobEvent::Started { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(canceled, 1);
    assert_eq!(engine.pool().idle_count("test"), 0);
}

#[tokio::test]
async fn upload_is_paced_by_worker_data_requests() {
    let (engine, mut worker) = seeded_engine();
    let payload = Bytes::from(vec![9u8; DATA_CHUNK_SIZE + 10]);
    let handle = engine
        .put("test://origin/upload", payload.clone(), true)
        .unwrap();

    match worker.recv_command().await {
        Command::Put {
            size, overwrite, ..
        } => {
            assert_eq!(size, payload.len() as u64);
            assert!(overwrite);
        }
        other => panic!("expected put, got {other:?}"),
    }

    let mut received = Vec::new();
    loop {
        worker.send(&WorkerMessage::DataRequest).await;
        match worker.recv_command().await {
            Command::Data(chunk) => {
                assert!(chunk.len() <= DATA_CHUNK_SIZE);
                received.extend_from_slice(&chunk);
            }
            Command::DataEnd => break,
            other => panic!("unexpected command {other:?}"),
        }
    }
    worker
        .send(&WorkerMessage::ProcessedSize(received.len() as u64))
        .await;
    worker.send(&WorkerMessage::Finished).await;

    assert!(handle.wait().await.is_success());
    assert_eq!(received, payload);
}

#[tokio::test]
async fn redirect_can_resume_and_list_entries_are_forwarded() {
    let (engine, mut worker) = seeded_engine();
    let mut handle = engine.list("test://origin/dir").unwrap();

    assert!(matches!(worker.recv_command().await, Command::List { .. }));
    worker
        .send(&WorkerMessage::Redirect("test://origin/dir/".into()))
        .await;
    worker.send(&WorkerMessage::CanResume(true)).await;
    worker
        .send(&WorkerMessage::ListEntry(stevedore::protocol::DirEntry {
            name: "entry.txt".into(),
            kind: stevedore::protocol::EntryKind::File,
            size: 12,
            modified: Some(1_700_000_000),
            permissions: Some(0o644),
        }))
        .await;
    worker.send(&WorkerMessage::Finished).await;

    let mut redirected = false;
    let mut resumable = None;
    let mut entries = Vec::new();
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Redirected { target, .. } => {
                redirected = true;
                assert_eq!(target, "test://origin/dir/");
            }
            JobEvent::CanResume { resumable: r, .. } => resumable = Some(r),
            JobEvent::ListEntry { entry, .. } => entries.push(entry),
            JobEvent::Started { .. } | JobEvent::Finished { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert!(redirected);
    assert_eq!(resumable, Some(true));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "entry.txt");
}

//! End-to-end tests: the engine driving the real `stevedore-file-worker`
//! binary over spawned processes.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use stevedore::engine::Engine;
use stevedore::job::{JobEvent, JobOutcome};
use stevedore::pool::WorkerPool;
use stevedore::protocols::ProtocolRegistry;
use stevedore::registry::JobRegistry;

fn engine_with_file_worker() -> Engine {
    let protocols = ProtocolRegistry::new();
    protocols.register("file", env!("CARGO_BIN_EXE_stevedore-file-worker"));
    Engine::with_parts(
        Arc::new(protocols),
        Arc::new(WorkerPool::default()),
        Arc::new(JobRegistry::new()),
    )
}

fn target(path: &Path) -> String {
    format!("file://{}", path.display())
}

async fn collect_payload(mut handle: stevedore::job::JobHandle) -> (Vec<u8>, usize) {
    let mut payload = Vec::new();
    let mut terminals = 0;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Data { chunk, .. } => payload.extend_from_slice(&chunk),
            JobEvent::Finished { .. } | JobEvent::Failed { .. } | JobEvent::Canceled { .. } => {
                terminals += 1
            }
            _ => {}
        }
    }
    (payload, terminals)
}

#[tokio::test]
async fn get_streams_a_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"line one\nline two\n").unwrap();

    let engine = engine_with_file_worker();
    let handle = engine.get(&target(&path)).unwrap();
    let (payload, terminals) = collect_payload(handle).await;

    assert_eq!(payload, b"line one\nline two\n");
    assert_eq!(terminals, 1);

    // The worker process is parked for reuse.
    assert_eq!(engine.pool().idle_count("file"), 1);
    assert_eq!(engine.registry().active_count(), 0);
}

#[tokio::test]
async fn sequential_jobs_reuse_the_pooled_worker() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.txt");
    let second = dir.path().join("second.txt");
    std::fs::write(&first, b"first").unwrap();
    std::fs::write(&second, b"second").unwrap();

    let engine = engine_with_file_worker();

    let (payload, _) = collect_payload(engine.get(&target(&first)).unwrap()).await;
    assert_eq!(payload, b"first");
    assert_eq!(engine.pool().idle_count("file"), 1);

    let (payload, _) = collect_payload(engine.get(&target(&second)).unwrap()).await;
    assert_eq!(payload, b"second");
    assert_eq!(engine.pool().idle_count("file"), 1);
}

#[tokio::test]
async fn copy_creates_an_identical_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src.bin");
    let dst = dir.path().join("dst.bin");
    let contents: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&src, &contents).unwrap();

    let engine = engine_with_file_worker();
    let handle = engine.copy(&target(&src), &target(&dst)).unwrap();
    assert!(handle.wait().await.is_success());

    assert_eq!(std::fs::read(&dst).unwrap(), contents);
    assert!(src.exists());
}

#[tokio::test]
async fn move_removes_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("moving.txt");
    let dst = dir.path().join("moved.txt");
    std::fs::write(&src, b"payload").unwrap();

    let engine = engine_with_file_worker();
    let handle = engine.move_to(&target(&src), &target(&dst)).unwrap();
    assert!(handle.wait().await.is_success());

    assert!(!src.exists());
    assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
}

#[tokio::test]
async fn put_writes_the_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uploaded.bin");
    let payload = Bytes::from(vec![3u8; 200_000]);

    let engine = engine_with_file_worker();
    let handle = engine
        .put(&target(&path), payload.clone(), false)
        .unwrap();
    assert!(handle.wait().await.is_success());

    assert_eq!(std::fs::read(&path).unwrap(), payload);
}

#[tokio::test]
async fn put_over_existing_file_respects_abort() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("precious.txt");
    std::fs::write(&path, b"keep me").unwrap();

    let engine = engine_with_file_worker();
    let mut handle = engine
        .put(&target(&path), Bytes::from_static(b"overwritten"), false)
        .unwrap();

    let mut canceled = 0;
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Warning { reply, .. } => reply.abort(),
            JobEvent::Canceled { .. } => canceled += 1,
            _ => {}
        }
    }

    assert_eq!(canceled, 1);
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
}

#[tokio::test]
async fn put_over_existing_file_proceeds_on_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replace.txt");
    std::fs::write(&path, b"old").unwrap();

    let engine = engine_with_file_worker();
    let handle = engine
        .put(&target(&path), Bytes::from_static(b"new contents"), false)
        .unwrap();

    // wait() answers warnings with "continue".
    assert!(handle.wait().await.is_success());
    assert_eq!(std::fs::read(&path).unwrap(), b"new contents");
}

#[tokio::test]
async fn list_reports_directory_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("one.txt"), b"1").unwrap();
    std::fs::write(dir.path().join("two.txt"), b"22").unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();

    let engine = engine_with_file_worker();
    let mut handle = engine.list(&target(dir.path())).unwrap();

    let mut names = Vec::new();
    while let Some(event) = handle.next_event().await {
        if let JobEvent::ListEntry { entry, .. } = event {
            names.push(entry.name);
        }
    }
    names.sort();
    assert_eq!(names, vec!["nested", "one.txt", "two.txt"]);
}

#[tokio::test]
async fn stat_reports_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stat-me.log");
    std::fs::write(&path, vec![0u8; 4096]).unwrap();

    let engine = engine_with_file_worker();
    let mut handle = engine.stat(&target(&path)).unwrap();

    let mut entry = None;
    while let Some(event) = handle.next_event().await {
        if let JobEvent::StatEntry { entry: e, .. } = event {
            entry = Some(e);
        }
    }
    let entry = entry.expect("stat entry");
    assert_eq!(entry.name, "stat-me.log");
    assert_eq!(entry.size, 4096);
}

#[tokio::test]
async fn mkdir_and_delete_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let sub = dir.path().join("scratch");

    let engine = engine_with_file_worker();
    assert!(engine
        .mkdir(&target(&sub))
        .unwrap()
        .wait()
        .await
        .is_success());
    assert!(sub.is_dir());

    assert!(engine
        .delete(&target(&sub))
        .unwrap()
        .wait()
        .await
        .is_success());
    assert!(!sub.exists());
}

#[tokio::test]
async fn get_with_preview_sniffs_content_type() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.html");
    let body = b"<html><body>hello</body></html>".to_vec();
    std::fs::write(&path, &body).unwrap();

    let engine = engine_with_file_worker();
    let mut handle = engine.get_with_preview(&target(&path), 10).unwrap();

    let mut preview = None;
    let mut trailing = Vec::new();
    while let Some(event) = handle.next_event().await {
        match event {
            JobEvent::Preview {
                data, content_type, ..
            } => preview = Some((data, content_type)),
            JobEvent::Data { chunk, .. } => trailing.extend_from_slice(&chunk),
            _ => {}
        }
    }

    let (data, content_type) = preview.expect("preview notification");
    assert_eq!(content_type.as_deref(), Some("text/html"));

    // Preview plus any trailing data reassembles the whole payload.
    let mut whole = data.to_vec();
    whole.extend_from_slice(&trailing);
    assert_eq!(whole, body);
}

#[tokio::test]
async fn missing_file_fails_but_worker_survives_for_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_file_worker();

    let handle = engine.get(&target(&dir.path().join("absent"))).unwrap();
    match handle.wait().await {
        JobOutcome::Failed(stevedore::error::JobError::WorkerReported { fatal, .. }) => {
            assert!(!fatal)
        }
        other => panic!("expected worker-reported failure, got {other:?}"),
    }

    // A clean protocol-level error keeps the worker pooled.
    assert_eq!(engine.pool().idle_count("file"), 1);

    let present = dir.path().join("present.txt");
    std::fs::write(&present, b"here").unwrap();
    let (payload, _) = collect_payload(engine.get(&target(&present)).unwrap()).await;
    assert_eq!(payload, b"here");
}
